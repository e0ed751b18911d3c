/// A single Caddyfile token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,

    /// The 1-based line on which the token starts.
    pub line: usize,
}

/// Splits Caddyfile text into tokens.
///
/// Tokens are separated by whitespace. A token that starts with `"` extends to
/// the closing quote, where `\"` and an escaped newline are the only escape
/// sequences. A token that starts with a backtick extends to the next backtick
/// verbatim. A `#` at the start of a token comments out the rest of the line.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;

    while let Some(&ch) = chars.peek() {
        if ch == '\n' {
            line += 1;
            chars.next();
            continue;
        }
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '#' {
            while chars.next_if(|c| *c != '\n').is_some() {}
            continue;
        }

        let start = line;
        let mut text = String::new();
        match ch {
            '"' => {
                chars.next();
                let mut escaped = false;
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                    }
                    if escaped {
                        if c != '"' && c != '\n' {
                            text.push('\\');
                        }
                        text.push(c);
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    } else {
                        text.push(c);
                    }
                }
                if escaped {
                    text.push('\\');
                }
            }
            '`' => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '`' {
                        break;
                    }
                    if c == '\n' {
                        line += 1;
                    }
                    text.push(c);
                }
            }
            _ => {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    text.push(c);
                }
            }
        }
        tokens.push(Token { text, line: start });
    }

    tokens
}
