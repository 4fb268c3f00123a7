//! A small, dependency-free configuration language: indentation-delimited
//! maps and lists with inline `[...]`/`{...}` shorthands, enough to describe
//! the server/route/limits tree in `spec.md` §6. Ported and cleaned up from
//! this crate's predecessor's `parser` crate (`YamlValue`, `Tokenizer`, `FromYaml`); kept
//! under a new name because the shape here is closer to a restricted
//! key-value config grammar than general YAML.

pub mod lexer;
mod value;
mod parser;
mod from_config;

pub use lexer::{LexerError, Token, Tokenizer};
pub use value::Value;
pub use parser::{ConfigError, Parser};
pub use from_config::FromConfig;
