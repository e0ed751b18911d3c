use crate::{Block, Container};
use std::cmp::Ordering;

impl Container {
    /// Canonicalizes the order of every nested container and renders the
    /// result as Caddyfile text.
    pub fn marshal(&mut self) -> Vec<u8> {
        self.marshal_string().into_bytes()
    }

    pub fn marshal_string(&mut self) -> String {
        self.sort();
        let mut buf = String::new();
        self.write(&mut buf, 0);
        buf
    }

    pub(crate) fn sort(&mut self) {
        for block in &mut self.children {
            block.children.sort();
        }
        self.children.sort_by(compare);
    }

    fn write(&self, buf: &mut String, level: usize) {
        for block in &self.children {
            block.write(buf, level);
        }
    }
}

impl Block {
    /// Renders this block alone, as if it were the only top-level block.
    pub fn marshal(&mut self) -> Vec<u8> {
        self.children.sort();
        let mut buf = String::new();
        self.write(&mut buf, 0);
        buf.into_bytes()
    }

    fn write(&self, buf: &mut String, level: usize) {
        indent(buf, level);
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                buf.push(' ');
            }
            write_key(buf, key);
        }
        if !self.children.is_empty() {
            if !self.keys.is_empty() {
                buf.push(' ');
            }
            buf.push_str("{\n");
            self.children.write(buf, level + 1);
            indent(buf, level);
            buf.push('}');
        }
        buf.push('\n');
    }
}

fn indent(buf: &mut String, level: usize) {
    for _ in 0..level {
        buf.push('\t');
    }
}

/// Writes `key` so that tokenizing it yields `key` again. Keys holding a
/// `"` or a backslash are wrapped in backticks, whose content is verbatim.
fn write_key(buf: &mut String, key: &str) {
    let needs_quotes =
        key.is_empty() || key.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'');
    if !needs_quotes {
        buf.push_str(key);
    } else if key.contains(|c| c == '"' || c == '\\') && !key.contains('`') {
        buf.push('`');
        buf.push_str(key);
        buf.push('`');
    } else {
        buf.push('"');
        buf.push_str(&key.replace('"', "\\\""));
        buf.push('"');
    }
}

/// The canonical total order of sibling blocks.
///
/// Global blocks come first, then blocks are ordered by their explicit order,
/// their keys, their key count, their children and finally their child count.
pub(crate) fn compare(a: &Block, b: &Block) -> Ordering {
    b.is_global_block()
        .cmp(&a.is_global_block())
        .then_with(|| a.order.cmp(&b.order))
        .then_with(|| compare_keys(&a.keys, &b.keys))
        .then_with(|| compare_children(&a.children, &b.children))
}

fn compare_keys(a: &[String], b: &[String]) -> Ordering {
    let common = a.len().min(b.len());
    for (ka, kb) in a[..common].iter().zip(&b[..common]) {
        match ka.cmp(kb) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    a.len().cmp(&b.len())
}

fn compare_children(a: &Container, b: &Container) -> Ordering {
    for (ca, cb) in a.children.iter().zip(&b.children) {
        match compare(ca, cb) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    a.len().cmp(&b.len())
}
