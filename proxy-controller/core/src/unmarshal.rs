use crate::{lexer::tokenize, Block, Container};
use thiserror::Error;

/// Caddyfile text could not be fully parsed.
///
/// The blocks parsed before the failure are retained and may be recovered
/// with [`ParseError::into_partial`].
#[derive(Debug, Error)]
#[error("{message} at line {line}")]
pub struct ParseError {
    line: usize,
    message: &'static str,
    partial: Container,
}

/// Parses Caddyfile text into a container.
///
/// Every parsed block is ordered by its position among its siblings, so that
/// marshaling the result preserves the source order. Tokens on the same line
/// belong to the same block; a token on a new line, or after a brace, starts
/// a new sibling.
pub fn unmarshal(input: &[u8]) -> Result<Container, ParseError> {
    let input = String::from_utf8_lossy(input);

    let mut root = Container::new();
    // Indices of the blocks whose children are currently open, outermost first.
    let mut open = Vec::<usize>::new();
    let mut current = 0;
    let mut new_block = true;
    let mut last_line = None;

    for token in tokenize(&input) {
        if last_line.is_some_and(|line| line != token.line) {
            new_block = true;
        }
        last_line = Some(token.line);

        if token.text == "}" {
            if open.pop().is_none() {
                return Err(ParseError {
                    line: token.line,
                    message: "unexpected '}'",
                    partial: root,
                });
            }
            new_block = true;
            continue;
        }

        let parent = container_at(&mut root, &open);
        if new_block {
            let mut block = Block::new();
            block.order = i32::try_from(parent.len()).unwrap_or(Block::NATURAL_ORDER);
            parent.add_block(block);
            current = parent.len() - 1;
            new_block = false;
        }

        if token.text == "{" {
            open.push(current);
            new_block = true;
        } else {
            // A token spanning several lines ends on a later line; tokens
            // following it on that line continue the same block.
            let newlines = token.text.matches('\n').count();
            last_line = Some(token.line + newlines);
            parent.children[current].keys.push(token.text);
        }
    }

    if !open.is_empty() {
        return Err(ParseError {
            line: last_line.unwrap_or(1),
            message: "unclosed '{'",
            partial: root,
        });
    }

    Ok(root)
}

fn container_at<'c>(root: &'c mut Container, path: &[usize]) -> &'c mut Container {
    path.iter()
        .fold(root, |container, &i| &mut container.children[i].children)
}

// === impl ParseError ===

impl ParseError {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn partial(&self) -> &Container {
        &self.partial
    }

    pub fn into_partial(self) -> Container {
        self.partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(input: &str) -> String {
        unmarshal(input.as_bytes())
            .expect("input must parse")
            .marshal_string()
    }

    #[test]
    fn preserves_source_order() {
        let input = "\
            zzz.example.com {\n\
                respond ok\n\
                encode gzip\n\
            }\n\
            aaa.example.com {\n\
                reverse_proxy app:8080\n\
            }\n";
        assert_eq!(
            roundtrip(input),
            "zzz.example.com {\n\trespond ok\n\tencode gzip\n}\n\
             aaa.example.com {\n\treverse_proxy app:8080\n}\n"
        );
    }

    #[test]
    fn parses_global_blocks_and_nesting() {
        let input = "{\n  email admin@example.com\n}\n\nexample.com {\n  route /api/* {\n    uri strip_prefix /api\n    reverse_proxy api:80\n  }\n}\n";
        let container = unmarshal(input.as_bytes()).unwrap();
        assert_eq!(container.len(), 2);
        assert!(container.children[0].is_global_block());
        assert_eq!(container.children[0].order, 0);
        assert_eq!(container.children[1].order, 1);
        let route = &container.children[1].children.children[0];
        assert_eq!(route.keys, vec!["route", "/api/*"]);
        assert_eq!(route.children.len(), 2);
    }

    #[test]
    fn quoted_tokens_roundtrip() {
        let input = "localhost {\n\theader X-Msg \"hello world\" `say \"hi\"`\n}\n";
        assert_eq!(roundtrip(input), input);

        let escaped = "localhost {\n\theader X-Msg \"hello world\" \"say \\\"hi\\\"\"\n}\n";
        assert_eq!(roundtrip(escaped), input);
    }

    #[test]
    fn multiline_tokens_continue_their_block() {
        let input = "localhost {\n\trespond \"a\nb\" 200\n\tencode gzip\n}\n";
        let container = unmarshal(input.as_bytes()).unwrap();
        let site = &container.children[0];
        assert_eq!(site.children.len(), 2);
        assert_eq!(site.children.children[0].keys, vec!["respond", "a\nb", "200"]);
    }

    #[test]
    fn braces_on_one_line_start_new_blocks() {
        let container = unmarshal(b"a { b }\nc\n").unwrap();
        assert_eq!(container.len(), 2);
        assert_eq!(container.children[0].keys, vec!["a"]);
        assert_eq!(container.children[0].children.children[0].keys, vec!["b"]);
        assert_eq!(container.children[1].keys, vec!["c"]);
    }

    #[test]
    fn unexpected_close_keeps_partial_tree() {
        let error = unmarshal(b"a {\n\tb\n}\n}\nc\n").unwrap_err();
        assert_eq!(error.line(), 4);
        assert_eq!(error.to_string(), "unexpected '}' at line 4");
        let partial = error.into_partial();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial.children[0].keys, vec!["a"]);
    }

    #[test]
    fn unclosed_block_is_an_error() {
        let error = unmarshal(b"a {\n\tb c\n").unwrap_err();
        assert_eq!(error.to_string(), "unclosed '{' at line 2");
        assert_eq!(error.partial().children[0].children.len(), 1);
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(unmarshal(b"").unwrap().is_empty());
        assert!(unmarshal(b"# only a comment\n").unwrap().is_empty());
    }
}
