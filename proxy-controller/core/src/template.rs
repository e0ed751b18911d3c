//! A small text template engine used to expand label values.
//!
//! A template is plain text with `{{ }}` actions. An action is a pipeline of
//! commands separated by `|`, where the result of each command is passed as
//! the final argument of the next one. Operands are fields of the data value
//! (`.`, `.Spec.Name`), string literals (`"..."` or `` `...` ``), numbers,
//! `true`, `false`, `nil`, named functions and parenthesized pipelines, which
//! may be followed by a field chain: `(index .Tasks 0).Status`.
//!
//! `{{-` and `-}}` trim the whitespace before and after an action, and
//! `{{/* ... */}}` is a comment. There are no control structures or
//! variables.
//!
//! Besides the caller's [`Funcs`], the builtins `index`, `len` and `print`
//! are available. Caller functions shadow builtins of the same name.

use ahash::AHashMap;
use serde_json::Value;
use thiserror::Error;

pub type Func = Box<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Named functions callable from templates.
#[derive(Default)]
pub struct Funcs(AHashMap<String, Func>);

#[derive(Clone, Debug)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("template: {message} at offset {offset}")]
    Parse { offset: usize, message: String },

    #[error("template: {0}")]
    Exec(String),
}

#[derive(Clone, Debug)]
enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Clone, Debug)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Clone, Debug)]
struct Command {
    args: Vec<Operand>,
}

#[derive(Clone, Debug)]
enum Operand {
    Dot,
    Field(Vec<String>),
    Func(String),
    Literal(Value),
    Sub(Pipeline, Vec<String>),
}

#[derive(Debug)]
enum Item {
    /// `.` yields an empty path.
    Field(Vec<String>),
    Ident(String),
    Literal(Value),
    Pipe,
    Open,
    Close,
    End,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    funcs: &'a Funcs,
}

struct Exec<'a> {
    dot: &'a Value,
    funcs: &'a Funcs,
}

const BUILTINS: &[&str] = &["index", "len", "print"];

/// Parses and executes `text` in one step.
pub fn render(text: &str, data: &Value, funcs: &Funcs) -> Result<String, Error> {
    Template::parse(text, funcs)?.execute(data, funcs)
}

// === impl Funcs ===

impl Funcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.0.insert(name.into(), Box::new(func));
    }

    pub fn with<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, func);
        self
    }

    fn get(&self, name: &str) -> Option<&Func> {
        self.0.get(name)
    }

    fn is_defined(&self, name: &str) -> bool {
        self.0.contains_key(name) || BUILTINS.contains(&name)
    }
}

impl std::fmt::Debug for Funcs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

// === impl Template ===

impl Template {
    /// Parses `text`. Every function the template names must be defined in
    /// `funcs` or be a builtin.
    pub fn parse(text: &str, funcs: &Funcs) -> Result<Self, Error> {
        let parser = Parser {
            src: text,
            pos: 0,
            funcs,
        };
        Ok(Self {
            nodes: parser.parse()?,
        })
    }

    pub fn execute(&self, data: &Value, funcs: &Funcs) -> Result<String, Error> {
        let exec = Exec { dot: data, funcs };
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => write_value(&mut out, &exec.pipeline(pipeline)?),
            }
        }
        Ok(out)
    }
}

// === impl Parser ===

impl Parser<'_> {
    fn parse(mut self) -> Result<Vec<Node>, Error> {
        let src = self.src;
        let mut nodes = Vec::new();
        loop {
            let rest = &src[self.pos..];
            let Some(open) = rest.find("{{") else {
                push_text(&mut nodes, rest);
                return Ok(nodes);
            };
            let mut text = &rest[..open];
            self.pos += open + 2;

            let after = &src[self.pos..];
            if after.starts_with('-') && after[1..].starts_with(char::is_whitespace) {
                text = text.trim_end();
                self.pos += 1;
            }
            push_text(&mut nodes, text);

            if let Some(pipeline) = self.action()? {
                nodes.push(Node::Action(pipeline));
            }
        }
    }

    /// Parses the remainder of an action after its opening delimiter. Returns
    /// `None` for comments.
    fn action(&mut self) -> Result<Option<Pipeline>, Error> {
        let src = self.src;
        let rest = &src[self.pos..];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with("/*") {
            return self.pipeline(false).map(Some);
        }

        let start = self.pos + rest.len() - trimmed.len();
        let close = trimmed
            .find("*/")
            .ok_or_else(|| self.error(start, "unclosed comment"))?;
        self.pos = start + close + 2;
        match self.next_item()? {
            Item::End => Ok(None),
            _ => Err(self.error(self.pos, "comment ends before closing delimiter")),
        }
    }

    fn pipeline(&mut self, nested: bool) -> Result<Pipeline, Error> {
        let mut commands = Vec::new();
        let mut args = Vec::new();
        loop {
            let offset = self.pos;
            match self.next_item()? {
                Item::End if !nested => break,
                Item::Close if nested => break,
                Item::End => return Err(self.error(offset, "unclosed left paren")),
                Item::Close => return Err(self.error(offset, "unexpected right paren")),
                Item::Pipe => {
                    if args.is_empty() {
                        return Err(self.error(offset, "missing command before '|'"));
                    }
                    commands.push(Command {
                        args: std::mem::take(&mut args),
                    });
                }
                Item::Open => {
                    let sub = self.pipeline(true)?;
                    let fields = self.chained_fields()?;
                    args.push(Operand::Sub(sub, fields));
                }
                Item::Field(path) if path.is_empty() => args.push(Operand::Dot),
                Item::Field(path) => args.push(Operand::Field(path)),
                Item::Ident(name) => {
                    if !self.funcs.is_defined(&name) {
                        return Err(self.error(offset, format!("function {name:?} not defined")));
                    }
                    args.push(Operand::Func(name));
                }
                Item::Literal(value) => args.push(Operand::Literal(value)),
            }
        }

        if args.is_empty() {
            let message = if commands.is_empty() {
                "missing value for command"
            } else {
                "missing command after '|'"
            };
            return Err(self.error(self.pos, message));
        }
        commands.push(Command { args });
        Ok(Pipeline { commands })
    }

    fn chained_fields(&mut self) -> Result<Vec<String>, Error> {
        if !self.src[self.pos..].starts_with('.') {
            return Ok(Vec::new());
        }
        let offset = self.pos;
        match self.next_item()? {
            Item::Field(path) if !path.is_empty() => Ok(path),
            _ => Err(self.error(offset, "unexpected '.' after parenthesized pipeline")),
        }
    }

    fn next_item(&mut self) -> Result<Item, Error> {
        let src = self.src;
        let rest = &src[self.pos..];
        let trimmed = rest.trim_start();
        let spaced = trimmed.len() < rest.len();
        self.pos += rest.len() - trimmed.len();
        let offset = self.pos;
        let rest = trimmed;

        let Some(ch) = rest.chars().next() else {
            return Err(self.error(offset, "unclosed action"));
        };
        let (item, len) = match ch {
            '}' if rest.starts_with("}}") => (Item::End, 2),
            '-' if spaced && rest[1..].starts_with("}}") => {
                self.pos += 3;
                let rest = &src[self.pos..];
                self.pos += rest.len() - rest.trim_start().len();
                return Ok(Item::End);
            }
            '|' => (Item::Pipe, 1),
            '(' => (Item::Open, 1),
            ')' => (Item::Close, 1),
            '"' => self.quoted(rest)?,
            '`' => {
                let close = rest[1..]
                    .find('`')
                    .ok_or_else(|| self.error(offset, "unterminated raw quoted string"))?;
                let text = rest[1..close + 1].to_string();
                (Item::Literal(Value::String(text)), close + 2)
            }
            '.' => field_path(rest),
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let len = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || "+-._".contains(c)))
                    .unwrap_or(rest.len());
                let value = number(&rest[..len])
                    .ok_or_else(|| self.error(offset, format!("bad number syntax: {:?}", &rest[..len])))?;
                (Item::Literal(value), len)
            }
            c if c.is_alphabetic() || c == '_' => {
                let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
                let item = match &rest[..len] {
                    "true" => Item::Literal(Value::Bool(true)),
                    "false" => Item::Literal(Value::Bool(false)),
                    "nil" => Item::Literal(Value::Null),
                    name => Item::Ident(name.to_string()),
                };
                (item, len)
            }
            c => return Err(self.error(offset, format!("unexpected {c:?} in action"))),
        };
        self.pos += len;
        Ok(item)
    }

    fn quoted(&self, rest: &str) -> Result<(Item, usize), Error> {
        let mut text = String::new();
        let mut chars = rest.char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Ok((Item::Literal(Value::String(text)), i + 1)),
                '\n' => break,
                '\\' => match chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, 'r')) => text.push('\r'),
                    Some((_, c @ ('\\' | '"' | '\''))) => text.push(c),
                    Some((j, c)) => {
                        return Err(self.error(self.pos + j, format!("unknown escape sequence \\{c}")))
                    }
                    None => break,
                },
                c => text.push(c),
            }
        }
        Err(self.error(self.pos, "unterminated quoted string"))
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::Parse {
            offset,
            message: message.into(),
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Lexes `.`, `.Name` or `.Name.Other` at the start of `rest`.
fn field_path(rest: &str) -> (Item, usize) {
    let mut path = Vec::new();
    let mut len = 0;
    while rest[len..].starts_with('.') {
        let name = &rest[len + 1..];
        let name_len = name.find(|c: char| !is_ident_char(c)).unwrap_or(name.len());
        if name_len == 0 {
            if path.is_empty() {
                len += 1;
            }
            break;
        }
        path.push(name[..name_len].to_string());
        len += 1 + name_len;
    }
    (Item::Field(path), len)
}

fn number(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    let f = text.parse::<f64>().ok()?;
    serde_json::Number::from_f64(f).map(Value::Number)
}

// === impl Exec ===

impl Exec<'_> {
    fn pipeline(&self, pipeline: &Pipeline) -> Result<Value, Error> {
        let mut last = None;
        for command in &pipeline.commands {
            last = Some(self.command(command, last)?);
        }
        Ok(last.unwrap_or(Value::Null))
    }

    fn command(&self, command: &Command, piped: Option<Value>) -> Result<Value, Error> {
        let Some((first, rest)) = command.args.split_first() else {
            return Ok(Value::Null);
        };
        if let Operand::Func(name) = first {
            let mut args = rest
                .iter()
                .map(|arg| self.operand(arg))
                .collect::<Result<Vec<_>, _>>()?;
            args.extend(piped);
            return self.call(name, &args);
        }
        if !rest.is_empty() || piped.is_some() {
            return Err(Error::Exec(format!(
                "can't give argument to non-function {}",
                describe(first)
            )));
        }
        self.operand(first)
    }

    fn operand(&self, operand: &Operand) -> Result<Value, Error> {
        match operand {
            Operand::Dot => Ok(self.dot.clone()),
            Operand::Field(path) => field(self.dot, path).cloned(),
            Operand::Func(name) => self.call(name, &[]),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Sub(pipeline, path) => {
                let value = self.pipeline(pipeline)?;
                field(&value, path).cloned()
            }
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        if let Some(func) = self.funcs.get(name) {
            return func(args).map_err(|error| Error::Exec(format!("error calling {name}: {error:#}")));
        }
        match name {
            "index" => index(args),
            "len" => len(args),
            "print" => Ok(print(args)),
            _ => Err(Error::Exec(format!("function {name:?} not defined"))),
        }
    }
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Dot => ".".to_string(),
        Operand::Field(path) | Operand::Sub(_, path) => format!(".{}", path.join(".")),
        Operand::Func(name) => name.clone(),
        Operand::Literal(value) => value.to_string(),
    }
}

fn field<'v>(value: &'v Value, path: &[String]) -> Result<&'v Value, Error> {
    path.iter().try_fold(value, |value, name| match value {
        Value::Object(fields) => fields
            .get(name)
            .ok_or_else(|| Error::Exec(format!("can't evaluate field {name}"))),
        Value::Null => Err(Error::Exec(format!("nil pointer evaluating field {name}"))),
        other => Err(Error::Exec(format!(
            "can't evaluate field {name} in type {}",
            kind(other)
        ))),
    })
}

fn index(args: &[Value]) -> Result<Value, Error> {
    let Some((item, keys)) = args.split_first() else {
        return Err(Error::Exec("wrong number of args for index: want at least 1 got 0".into()));
    };
    let mut item = item.clone();
    for key in keys {
        item = match (&item, key) {
            (Value::Array(items), Value::Number(n)) => n
                .as_u64()
                .and_then(|i| items.get(usize::try_from(i).ok()?))
                .cloned()
                .ok_or_else(|| Error::Exec(format!("error calling index: index out of range: {n}")))?,
            (Value::Object(fields), Value::String(k)) => fields.get(k).cloned().unwrap_or(Value::Null),
            (Value::Null, _) => return Err(Error::Exec("error calling index: index of untyped nil".into())),
            (item, key) => {
                return Err(Error::Exec(format!(
                    "error calling index: cannot index {} with {}",
                    kind(item),
                    kind(key)
                )))
            }
        };
    }
    Ok(item)
}

fn len(args: &[Value]) -> Result<Value, Error> {
    let n = match args {
        [Value::String(s)] => s.len(),
        [Value::Array(items)] => items.len(),
        [Value::Object(fields)] => fields.len(),
        [other] => return Err(Error::Exec(format!("error calling len: len of {}", kind(other)))),
        _ => {
            return Err(Error::Exec(format!(
                "wrong number of args for len: want 1 got {}",
                args.len()
            )))
        }
    };
    Ok(Value::from(n))
}

/// Concatenates the arguments, separating adjacent non-string operands with
/// a space.
fn print(args: &[Value]) -> Value {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        write_value(&mut out, arg);
    }
    Value::String(out)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "slice",
        Value::Object(_) => "map",
    }
}

/// Writes a value as text. `nil` renders as nothing, slices as `[a b]` and
/// maps as `map[k:v]` with sorted keys.
fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            out.push_str("map[");
            let mut keys = fields.keys().collect::<Vec<_>>();
            keys.sort();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(key);
                out.push(':');
                write_value(out, &fields[key]);
            }
            out.push(']');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "Names": ["/web", "/web-alias"],
            "Labels": { "app": "shop", "tier": "front" },
            "Spec": { "Name": "shop_web", "Replicas": 3 },
            "Tasks": [{ "Status": "running" }],
            "Empty": null,
        })
    }

    fn funcs() -> Funcs {
        Funcs::new()
            .with("http", |_| Ok(json!("http")))
            .with("upper", |args| match args {
                [Value::String(s)] => Ok(Value::String(s.to_uppercase())),
                _ => anyhow::bail!("expected one string"),
            })
            .with("join", |args| {
                let parts = args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
                Ok(Value::String(parts.join("+")))
            })
            .with("fail", |_| anyhow::bail!("boom"))
    }

    fn run(text: &str) -> Result<String, Error> {
        render(text, &data(), &funcs())
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(run("reverse_proxy app:80").unwrap(), "reverse_proxy app:80");
        assert_eq!(run("").unwrap(), "");
        assert_eq!(run("a } b {").unwrap(), "a } b {");
    }

    #[test]
    fn fields_and_index() {
        assert_eq!(run("{{.Spec.Name}}").unwrap(), "shop_web");
        assert_eq!(run("{{ .Spec.Replicas }}").unwrap(), "3");
        assert_eq!(run("{{index .Names 0}}").unwrap(), "/web");
        assert_eq!(run(r#"{{index .Labels "app"}}.local"#).unwrap(), "shop.local");
        assert_eq!(run(r#"[{{index .Labels "missing"}}]"#).unwrap(), "[]");
        assert_eq!(run("{{(index .Tasks 0).Status}}").unwrap(), "running");
        assert_eq!(run("{{len .Names}}").unwrap(), "2");
    }

    #[test]
    fn renders_composite_values() {
        assert_eq!(run("{{.Names}}").unwrap(), "[/web /web-alias]");
        assert_eq!(run("{{.Labels}}").unwrap(), "map[app:shop tier:front]");
        assert_eq!(run("{{.Empty}}").unwrap(), "");
    }

    #[test]
    fn functions_and_pipelines() {
        assert_eq!(run("{{http}}://x").unwrap(), "http://x");
        assert_eq!(run(r#"{{ "abc" | upper }}"#).unwrap(), "ABC");
        assert_eq!(run("{{ .Spec.Name | upper }}").unwrap(), "SHOP_WEB");
        assert_eq!(run(r#"{{ join 80 "a" http }}"#).unwrap(), r#"80+"a"+"http""#);
        assert_eq!(run(r#"{{ join (upper "a") -1 }}"#).unwrap(), r#""A"+-1"#);
        assert_eq!(run(r#"{{print 1 2 "x" 3}}"#).unwrap(), "1 2x3");
        assert_eq!(run("{{ `raw \"q\"` }}").unwrap(), r#"raw "q""#);
    }

    #[test]
    fn trim_markers_and_comments() {
        assert_eq!(run("a  {{- .Spec.Name -}}  b").unwrap(), "ashop_webb");
        assert_eq!(run("a {{.Spec.Name -}}\n b").unwrap(), "a shop_webb");
        assert_eq!(run("a{{/* note */}}b").unwrap(), "ab");
        assert_eq!(run("a {{- /* note */ -}} b").unwrap(), "ab");
    }

    #[test]
    fn parse_errors() {
        for text in [
            "{{ .Name",
            "{{ missing }}",
            r#"{{ "unterminated }}"#,
            "{{ ) }}",
            "{{ (upper \"a\" }}",
            "{{ }}",
            "{{ .Name | }}",
            "{{/* open }}",
            "{{ 1x }}",
        ] {
            assert!(
                matches!(Template::parse(text, &funcs()), Err(Error::Parse { .. })),
                "{text:?} should not parse"
            );
        }
    }

    #[test]
    fn execution_errors() {
        for text in [
            "{{ .Missing }}",
            "{{ .Empty.Field }}",
            "{{ .Spec.Name.Other }}",
            "{{ fail }}",
            "{{ .Spec.Name 1 }}",
            "{{ index .Names 5 }}",
            "{{ index .Names \"a\" }}",
            "{{ len 3 }}",
        ] {
            let template = Template::parse(text, &funcs()).expect("template must parse");
            assert!(
                matches!(template.execute(&data(), &funcs()), Err(Error::Exec(_))),
                "{text:?} should fail to execute"
            );
        }
    }

    #[test]
    fn function_errors_carry_the_function_name() {
        let error = run("{{ fail }}").unwrap_err();
        assert_eq!(error.to_string(), "template: error calling fail: boom");
    }
}
