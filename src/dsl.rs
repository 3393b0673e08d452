//! Lexer and recursive-descent parser for field-type expressions such as
//! `array(of=char(max_len=8))`.
//!
//! Grammar:
//! ```text
//! type   := NAME ( '(' args ')' )?
//! args   := (NAME '=' value (',' NAME '=' value)*)?
//! value  := INT | type
//! ```

use crate::schema::FieldType;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Name(String),
    Int(i64),
    CallStart,
    Equal,
    ParamSep,
    CallEnd,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(s) => write!(f, "{s}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::CallStart => write!(f, "("),
            Token::Equal => write!(f, "="),
            Token::ParamSep => write!(f, ","),
            Token::CallEnd => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error("invalid character: {0:?}")]
    InvalidChar(char),
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error("unexpected token {found}, expected {expected}")]
    UnexpectedToken { found: Token, expected: String },
    #[error("unknown type name {0:?}, valid choices: {1:?}")]
    UnknownTypeName(String, Vec<String>),
    #[error("trailing input after type expression: {0}")]
    TrailingInput(String),
    #[error("integer literal {0:?} does not fit in an i64")]
    IntOverflow(String),
}

/// Turns the expression into a flat token list. Whitespace is skipped.
/// Unknown characters fail immediately with the offending char.
pub fn lex(input: &str) -> Result<Vec<Token>, DslError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::CallStart);
            }
            ')' => {
                chars.next();
                tokens.push(Token::CallEnd);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equal);
            }
            ',' => {
                chars.next();
                tokens.push(Token::ParamSep);
            }
            c if c.is_ascii_lowercase() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_lowercase() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: i64 = digits
                    .parse()
                    .map_err(|_| DslError::IntOverflow(digits.clone()))?;
                tokens.push(Token::Int(n));
            }
            other => return Err(DslError::InvalidChar(other)),
        }
    }

    Ok(tokens)
}

const VALID_TYPE_NAMES: &[&str] = &[
    "text", "string", "char", "int", "bigint", "bool", "double", "json", "array", "geom",
    "timestamp",
];

/// One parsed `name=value` argument to a type call.
enum Arg {
    Int(i64),
    Type(FieldType),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &str) -> Result<Token, DslError> {
        self.next()
            .ok_or_else(|| DslError::UnexpectedEof(expected.to_string()))
    }

    fn parse_field_type(&mut self) -> Result<FieldType, DslError> {
        let name = match self.expect("a type name")? {
            Token::Name(n) => n,
            found => {
                return Err(DslError::UnexpectedToken {
                    found,
                    expected: "a type name".to_string(),
                })
            }
        };

        if !VALID_TYPE_NAMES.contains(&name.as_str()) {
            return Err(DslError::UnknownTypeName(
                name,
                VALID_TYPE_NAMES.iter().map(|s| s.to_string()).collect(),
            ));
        }

        let mut args: Vec<(String, Arg)> = Vec::new();
        if matches!(self.peek(), Some(Token::CallStart)) {
            self.next();
            if !matches!(self.peek(), Some(Token::CallEnd)) {
                loop {
                    let arg_name = match self.expect("an argument name")? {
                        Token::Name(n) => n,
                        found => {
                            return Err(DslError::UnexpectedToken {
                                found,
                                expected: "an argument name".to_string(),
                            })
                        }
                    };
                    match self.expect("'='")? {
                        Token::Equal => {}
                        found => {
                            return Err(DslError::UnexpectedToken {
                                found,
                                expected: "'='".to_string(),
                            })
                        }
                    }
                    let value = match self.peek() {
                        Some(Token::Int(_)) => match self.next() {
                            Some(Token::Int(n)) => Arg::Int(n),
                            _ => unreachable!(),
                        },
                        Some(Token::Name(_)) => Arg::Type(self.parse_field_type()?),
                        _ => {
                            return Err(DslError::UnexpectedToken {
                                found: self
                                    .peek()
                                    .cloned()
                                    .unwrap_or(Token::Name("<eof>".to_string())),
                                expected: "an int or nested type".to_string(),
                            })
                        }
                    };
                    args.push((arg_name, value));

                    match self.peek() {
                        Some(Token::ParamSep) => {
                            self.next();
                        }
                        Some(Token::CallEnd) => break,
                        _ => {
                            return Err(DslError::UnexpectedEof(
                                "',' or ')' in argument list".to_string(),
                            ))
                        }
                    }
                }
            }
            match self.expect("')'")? {
                Token::CallEnd => {}
                found => {
                    return Err(DslError::UnexpectedToken {
                        found,
                        expected: "')'".to_string(),
                    })
                }
            }
        }

        build_field_type(&name, args)
    }
}

fn build_field_type(name: &str, args: Vec<(String, Arg)>) -> Result<FieldType, DslError> {
    let mut args: std::collections::HashMap<String, Arg> = args.into_iter().collect();
    let take_int = |args: &mut std::collections::HashMap<String, Arg>, key: &str| {
        args.remove(key).and_then(|a| match a {
            Arg::Int(n) => Some(n as usize),
            _ => None,
        })
    };
    let take_type = |args: &mut std::collections::HashMap<String, Arg>, key: &str| {
        args.remove(key).and_then(|a| match a {
            Arg::Type(t) => Some(t),
            _ => None,
        })
    };

    Ok(match name {
        "text" => FieldType::Text,
        "string" => FieldType::String {
            max_len: take_int(&mut args, "max_len"),
        },
        "char" => {
            let max_len = take_int(&mut args, "max_len").ok_or_else(|| {
                DslError::UnexpectedEof("char requires max_len".to_string())
            })?;
            FieldType::Char { max_len }
        }
        "int" => FieldType::Int,
        "bigint" => FieldType::BigInt,
        "bool" => FieldType::Bool,
        "double" => FieldType::Double,
        "json" => FieldType::Json,
        "array" => {
            let of = take_type(&mut args, "of").ok_or_else(|| {
                DslError::UnexpectedEof("array requires of".to_string())
            })?;
            FieldType::Array { of: Box::new(of) }
        }
        "geom" => FieldType::Geom,
        "timestamp" => FieldType::Timestamp,
        _ => unreachable!("validated against VALID_TYPE_NAMES"),
    })
}

/// Parses a complete field-type expression, failing on any trailing tokens.
pub fn parse_str(input: &str) -> Result<FieldType, DslError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let field_type = parser.parse_field_type()?;
    if parser.pos != parser.tokens.len() {
        return Err(DslError::TrailingInput(
            parser.tokens[parser.pos..]
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(""),
        ));
    }
    Ok(field_type)
}
