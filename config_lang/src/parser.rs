use std::collections::BTreeMap;
use std::fmt;

use crate::lexer::{LexerError, Token, Tokenizer};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Lex(LexerError),
    Unexpected(String),
    Indentation(String),
    Missing(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Lex(e) => write!(f, "lex error: {e}"),
            ConfigError::Unexpected(s) => write!(f, "unexpected token: {s}"),
            ConfigError::Indentation(s) => write!(f, "indentation error: {s}"),
            ConfigError::Missing(s) => write!(f, "missing field: {s}"),
            ConfigError::Invalid(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<LexerError> for ConfigError {
    fn from(e: LexerError) -> Self {
        ConfigError::Lex(e)
    }
}

/// Recursive-descent parser over the indentation grammar. Grounded on
/// this crate's predecessor's `parser::Parser` (`parser/src/lib.rs`), reworked to own its
/// tokens and to fix the indent/dedent bookkeeping the original left
/// inconsistent (`indent_stack` was declared but never read there).
pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, ConfigError> {
        let mut tokenizer = Tokenizer::new(source);
        let lookahead = tokenizer.next_token()?;
        Ok(Self { tokenizer, lookahead })
    }

    fn advance(&mut self) -> Result<(), ConfigError> {
        self.lookahead = self.tokenizer.next_token()?;
        Ok(())
    }

    fn skip_blank(&mut self) -> Result<(), ConfigError> {
        while matches!(self.lookahead, Token::NewLine) {
            self.advance()?;
        }
        Ok(())
    }

    pub fn parse(&mut self) -> Result<Value, ConfigError> {
        self.skip_blank()?;
        let indent = if let Token::Indent(n) = self.lookahead {
            let n = n;
            self.advance()?;
            n
        } else {
            0
        };
        self.skip_blank()?;
        if matches!(self.lookahead, Token::Eof) {
            return Ok(Value::Map(BTreeMap::new()));
        }
        self.parse_value(indent)
    }

    fn parse_value(&mut self, indent: usize) -> Result<Value, ConfigError> {
        match self.lookahead.clone() {
            Token::Dash => self.parse_list(indent),
            Token::OpenBracket => self.parse_inline_list(),
            Token::OpenBrace => self.parse_inline_map(),
            Token::Ident(s) | Token::Scalar(s) => {
                self.advance()?;
                if matches!(self.lookahead, Token::Colon) {
                    self.parse_map(s, indent)
                } else {
                    Ok(Value::Scalar(s))
                }
            }
            Token::Eof => Ok(Value::Scalar(String::new())),
            other => Err(ConfigError::Unexpected(format!("{other:?}"))),
        }
    }

    fn parse_map(&mut self, first_key: String, indent: usize) -> Result<Value, ConfigError> {
        let mut map = BTreeMap::new();
        let mut key = first_key;

        loop {
            if !matches!(self.lookahead, Token::Colon) {
                return Err(ConfigError::Unexpected(format!(
                    "expected ':' after '{key}', found {:?}",
                    self.lookahead
                )));
            }
            self.advance()?;

            if matches!(self.lookahead, Token::NewLine) {
                self.advance()?;
                self.skip_blank()?;
                match self.lookahead.clone() {
                    Token::Indent(n) if n > indent => {
                        self.advance()?;
                        let value = self.parse_value(n)?;
                        map.insert(key.clone(), value);
                    }
                    _ => {
                        map.insert(key.clone(), Value::Scalar(String::new()));
                    }
                }
            } else {
                let value = self.parse_value(indent)?;
                map.insert(key.clone(), value);
            }

            self.skip_blank()?;
            match self.lookahead.clone() {
                Token::Indent(n) if n == indent => {
                    self.advance()?;
                    match self.lookahead.clone() {
                        Token::Ident(s) | Token::Scalar(s) => {
                            key = s;
                            self.advance()?;
                            continue;
                        }
                        Token::Eof => break,
                        other => {
                            return Err(ConfigError::Unexpected(format!(
                                "expected a map key, found {other:?}"
                            )));
                        }
                    }
                }
                _ => break,
            }
        }

        Ok(Value::Map(map))
    }

    fn parse_list(&mut self, indent: usize) -> Result<Value, ConfigError> {
        let mut items = Vec::new();
        let item_indent = indent + 2;

        loop {
            if !matches!(self.lookahead, Token::Dash) {
                break;
            }
            self.advance()?;
            items.push(self.parse_value(item_indent)?);

            self.skip_blank()?;
            match self.lookahead.clone() {
                Token::Indent(n) if n == indent => {
                    self.advance()?;
                    if matches!(self.lookahead, Token::Dash) {
                        continue;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }

        Ok(Value::List(items))
    }

    fn parse_inline_list(&mut self) -> Result<Value, ConfigError> {
        self.advance()?; // consume '['
        let mut items = Vec::new();
        loop {
            self.skip_blank()?;
            if matches!(self.lookahead, Token::CloseBracket | Token::Eof) {
                break;
            }
            items.push(self.parse_value(0)?);
            self.skip_blank()?;
            if matches!(self.lookahead, Token::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }
        if !matches!(self.lookahead, Token::CloseBracket) {
            return Err(ConfigError::Unexpected("expected ']'".into()));
        }
        self.advance()?;
        Ok(Value::List(items))
    }

    fn parse_inline_map(&mut self) -> Result<Value, ConfigError> {
        self.advance()?; // consume '{'
        let mut map = BTreeMap::new();
        loop {
            self.skip_blank()?;
            if matches!(self.lookahead, Token::CloseBrace | Token::Eof) {
                break;
            }
            let key = match self.lookahead.clone() {
                Token::Ident(s) | Token::Scalar(s) => {
                    self.advance()?;
                    s
                }
                other => return Err(ConfigError::Unexpected(format!("expected key, found {other:?}"))),
            };
            if !matches!(self.lookahead, Token::Colon) {
                return Err(ConfigError::Unexpected("expected ':'".into()));
            }
            self.advance()?;
            let value = self.parse_value(0)?;
            map.insert(key, value);
            self.skip_blank()?;
            if matches!(self.lookahead, Token::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }
        if !matches!(self.lookahead, Token::CloseBrace) {
            return Err(ConfigError::Unexpected("expected '}'".into()));
        }
        self.advance()?;
        Ok(Value::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn parse(source: &str) -> Value {
        Parser::new(source).unwrap().parse().unwrap()
    }

    fn scalar(v: &Value, key: &str) -> &str {
        v.get(key).and_then(Value::as_scalar).unwrap()
    }

    #[test]
    fn flat_map_of_scalars() {
        let v = parse("name: bob\nage: 3\n");
        assert_eq!(scalar(&v, "name"), "bob");
        assert_eq!(scalar(&v, "age"), "3");
    }

    #[test]
    fn nested_block_list_of_maps() {
        let v = parse("servers:\n  - name: a\n    port: 8080\n  - name: b\n    port: 8081\n");
        let Value::List(servers) = v.get("servers").unwrap() else {
            panic!("expected a list");
        };
        assert_eq!(servers.len(), 2);
        assert_eq!(scalar(&servers[0], "name"), "a");
        assert_eq!(scalar(&servers[1], "port"), "8081");
    }

    #[test]
    fn inline_list_and_map_shorthands() {
        let v = parse("ports: [80, 443]\nlimits: {maxrun: 10, maxwait: 5}\n");
        let Value::List(ports) = v.get("ports").unwrap() else {
            panic!("expected a list");
        };
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].as_scalar(), Some("80"));
        assert_eq!(scalar(v.get("limits").unwrap(), "maxrun"), "10");
        assert_eq!(scalar(v.get("limits").unwrap(), "maxwait"), "5");
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let v = parse("# a comment\n\nname: bob\n\n# trailing\n");
        assert_eq!(scalar(&v, "name"), "bob");
    }

    #[test]
    fn dash_inside_a_bare_token_is_not_a_list_marker() {
        let v = parse("host: my-host-name\n");
        assert_eq!(scalar(&v, "host"), "my-host-name");
    }

    #[test]
    fn quoted_scalars_preserve_special_characters() {
        let v = parse("path: \"/a/b: c\"\n");
        assert_eq!(scalar(&v, "path"), "/a/b: c");
    }
}
