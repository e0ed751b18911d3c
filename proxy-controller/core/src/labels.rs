use crate::{
    lexer::tokenize,
    template::{self, Funcs, Template},
    Block, Container,
};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// `(PARENT.)(ORDER_)NAME(_DISCRIMINATOR)`, where `PARENT` is itself a path.
static LABEL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(.+)\.)?(?:(\d+)_)?([^.]+?)(?:_(\d+))?$").expect("label path regex must compile")
});

#[derive(Debug, Error)]
pub enum LabelsError {
    #[error("invalid label {0:?}")]
    InvalidPath(String),

    #[error("invalid template in label {label:?}: {source}")]
    Template {
        label: String,
        #[source]
        source: template::Error,
    },
}

/// Blocks are built in an arena so that a label can attach keys to a block
/// that was created, or will be parented, by another label.
#[derive(Default)]
struct Arena {
    blocks: Vec<Block>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    by_path: AHashMap<String, usize>,
}

/// Builds a Caddyfile tree from flat labels.
///
/// Each label key is a dotted path of blocks; the label value, after template
/// expansion against `data`, is tokenized into the block's arguments. Labels
/// sharing a path prefix share the parent block. A numeric `N_` prefix on a
/// path segment sets the block's order and a `_N` suffix distinguishes
/// otherwise identical sibling paths. Top-level paths produce blocks whose
/// keys come only from their value; a top-level path without a value is a
/// global options block.
///
/// A value whose template does not parse fails the whole call. A value whose
/// template fails to execute expands to nothing.
pub fn from_labels(
    labels: &BTreeMap<String, String>,
    data: &Value,
    funcs: &Funcs,
) -> Result<Container, LabelsError> {
    let mut arena = Arena::default();
    for (label, value) in labels {
        let idx = arena.get_or_create(label)?;
        let text = expand(label, value, data, funcs)?;
        arena.blocks[idx]
            .keys
            .extend(tokenize(&text).into_iter().map(|t| t.text));
    }
    Ok(arena.into_container())
}

fn expand(label: &str, value: &str, data: &Value, funcs: &Funcs) -> Result<String, LabelsError> {
    if !value.contains("{{") {
        return Ok(value.to_string());
    }

    let template = Template::parse(value, funcs).map_err(|source| LabelsError::Template {
        label: label.to_string(),
        source,
    })?;
    match template.execute(data, funcs) {
        Ok(text) => Ok(text),
        Err(error) => {
            tracing::debug!(%label, %error, "Label template expanded to nothing");
            Ok(String::new())
        }
    }
}

// === impl Arena ===

impl Arena {
    fn get_or_create(&mut self, path: &str) -> Result<usize, LabelsError> {
        if let Some(&idx) = self.by_path.get(path) {
            return Ok(idx);
        }

        let caps = LABEL_PATH
            .captures(path)
            .ok_or_else(|| LabelsError::InvalidPath(path.to_string()))?;
        let mut block = Block::new();
        if let Some(order) = caps.get(2) {
            block.order = order.as_str().parse().unwrap_or(Block::NATURAL_ORDER);
        }

        // Parents are created first, so a block's index is always greater
        // than its parent's.
        let parent = match caps.get(1) {
            Some(parent) => {
                let name = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                block.keys.push(name.to_string());
                Some(self.get_or_create(parent.as_str())?)
            }
            None => None,
        };

        let idx = self.blocks.len();
        self.blocks.push(block);
        self.children.push(Vec::new());
        match parent {
            Some(parent) => self.children[parent].push(idx),
            None => self.roots.push(idx),
        }
        self.by_path.insert(path.to_string(), idx);
        Ok(idx)
    }

    fn into_container(self) -> Container {
        let Self {
            blocks,
            children,
            roots,
            ..
        } = self;
        let mut blocks = blocks.into_iter().map(Some).collect::<Vec<_>>();
        roots
            .into_iter()
            .map(|idx| assemble(idx, &mut blocks, &children))
            .collect()
    }
}

fn assemble(idx: usize, blocks: &mut [Option<Block>], children: &[Vec<usize>]) -> Block {
    let mut block = blocks[idx].take().unwrap_or_default();
    for &child in &children[idx] {
        let child = assemble(child, blocks, children);
        block.add_block(child);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unmarshal;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn render(labels: BTreeMap<String, String>) -> String {
        from_labels(&labels, &Value::Null, &Funcs::new())
            .expect("labels must parse")
            .marshal_string()
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case::grouping(
        &[("caddy", "localhost"), ("caddy.group.a", "x"), ("caddy.group.b", "y")],
        "localhost {\n\tgroup {\n\t\ta x\n\t\tb y\n\t}\n}\n"
    )]
    #[case::explicit_order(
        &[("caddy", "localhost"), ("caddy.2_aaa", ""), ("caddy.1_bbb", ""), ("caddy.ccc", "")],
        "localhost {\n\tbbb\n\taaa\n\tccc\n}\n"
    )]
    #[case::natural_order_is_lexicographic(
        &[("caddy", "localhost"), ("caddy.tls", "internal"), ("caddy.encode", "gzip")],
        "localhost {\n\tencode gzip\n\ttls internal\n}\n"
    )]
    #[case::discriminator(
        &[("caddy", "localhost"), ("caddy.group_1.a", "x"), ("caddy.group_2.b", "y")],
        "localhost {\n\tgroup {\n\t\ta x\n\t}\n\tgroup {\n\t\tb y\n\t}\n}\n"
    )]
    #[case::multiple_sites(
        &[("caddy", "a.com"), ("caddy_1", "b.com"), ("caddy_1.respond", "ok")],
        "a.com\nb.com {\n\trespond ok\n}\n"
    )]
    #[case::global_options(
        &[("caddy.email", "admin@example.com"), ("caddy.auto_https", "off")],
        "{\n\tauto_https off\n\temail admin@example.com\n}\n"
    )]
    #[case::quoted_values(
        &[("caddy", "localhost"), ("caddy.header", r#"X-Msg "hello world""#)],
        "localhost {\n\theader X-Msg \"hello world\"\n}\n"
    )]
    #[case::ordered_and_discriminated(
        &[("caddy", "localhost"), ("caddy.1_route_1", "/a"), ("caddy.1_route_1.respond", "a"), ("caddy.0_route_2", "/b")],
        "localhost {\n\troute /b\n\troute /a {\n\t\trespond a\n\t}\n}\n"
    )]
    fn renders(#[case] pairs: &[(&str, &str)], #[case] expected: &str) {
        assert_eq!(render(labels(pairs)), expected);
    }

    #[test]
    fn expands_templates() {
        let funcs = Funcs::new().with("upstreams", |args| {
            let port = args.first().and_then(Value::as_i64).unwrap_or(80);
            Ok(Value::String(format!("10.0.0.1:{port} 10.0.0.2:{port}")))
        });
        let labels = btreemap! {
            "caddy".to_string() => "{{.Name}}.example.com".to_string(),
            "caddy.reverse_proxy".to_string() => "{{upstreams 8080}}".to_string(),
        };
        let container = from_labels(&labels, &json!({ "Name": "web" }), &funcs).unwrap();
        assert_eq!(
            container.clone().marshal_string(),
            "web.example.com {\n\treverse_proxy 10.0.0.1:8080 10.0.0.2:8080\n}\n"
        );
    }

    #[test]
    fn failed_expansion_yields_no_arguments() {
        let labels = btreemap! {
            "caddy".to_string() => "localhost".to_string(),
            "caddy.respond".to_string() => "{{.Missing}}".to_string(),
        };
        let mut container = from_labels(&labels, &json!({}), &Funcs::new()).unwrap();
        assert_eq!(container.marshal_string(), "localhost {\n\trespond\n}\n");
    }

    #[test]
    fn malformed_template_is_an_error() {
        let labels = btreemap! {
            "caddy".to_string() => "localhost".to_string(),
            "caddy.respond".to_string() => "{{ .Name".to_string(),
        };
        match from_labels(&labels, &Value::Null, &Funcs::new()) {
            Err(LabelsError::Template { label, .. }) => assert_eq!(label, "caddy.respond"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_path_is_an_error() {
        let labels = btreemap! { "caddy.".to_string() => "x".to_string() };
        assert!(matches!(
            from_labels(&labels, &Value::Null, &Funcs::new()),
            Err(LabelsError::InvalidPath(_))
        ));
    }

    #[test]
    fn shared_parents_are_created_once() {
        let labels = labels(&[
            ("caddy.b.c.d", "1"),
            ("caddy.b.c.e", "2"),
            ("caddy.b", "x"),
            ("caddy", "site"),
        ]);
        let container = from_labels(&labels, &Value::Null, &Funcs::new()).unwrap();
        assert_eq!(container.len(), 1);
        let b = &container.children[0].children;
        assert_eq!(b.len(), 1);
        assert_eq!(b.children[0].keys, vec!["b", "x"]);
        assert_eq!(b.children[0].children.children[0].children.len(), 2);
    }

    #[test]
    fn rendering_is_a_fixed_point() {
        let labels = labels(&[
            ("caddy.email", "admin@example.com"),
            ("caddy_1", "(common)"),
            ("caddy_1.encode", "zstd gzip"),
            ("caddy_2", "shop.example.com www.shop.example.com"),
            ("caddy_2.import", "common"),
            ("caddy_2.1_route", "/api/*"),
            ("caddy_2.1_route.uri", "strip_prefix /api"),
            ("caddy_2.1_route.reverse_proxy", "api:80"),
            ("caddy_2.2_route", "*"),
            ("caddy_2.2_route.reverse_proxy", "web:80"),
            ("caddy_2.header", r#"X-Powered-By "a 'quoted' value""#),
            ("caddy_2.tls", "internal"),
        ]);
        let rendered = from_labels(&labels, &Value::Null, &Funcs::new())
            .unwrap()
            .marshal_string();
        let reparsed = unmarshal(rendered.as_bytes()).unwrap().marshal_string();
        assert_eq!(reparsed, rendered);
    }
}
