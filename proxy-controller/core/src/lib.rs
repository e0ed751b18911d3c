#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! An intermediate representation of Caddyfiles.
//!
//! Configuration is discovered as flat container labels, parsed into a tree
//! of [`Block`]s, merged with other trees, and rendered back into canonical
//! Caddyfile text.

mod block;
mod labels;
mod lexer;
mod marshal;
mod merge;
mod processor;
pub mod template;
mod unmarshal;

pub use self::{
    block::{Block, Container},
    labels::{from_labels, LabelsError},
    lexer::{tokenize, Token},
    processor::{process, Adapter},
    unmarshal::{unmarshal, ParseError},
};

/// Placeholder content used when nothing was generated.
pub const EMPTY_CADDYFILE: &str = "# Empty caddyfile";
