// SPDX-License-Identifier: MIT

//! Condition expression parser
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := "(" expr ")" | "true" | "false" | path [op literal]
//! ```

use super::ast::{CompareOp, Expression, Literal};
use thiserror::Error;

/// Error produced for a malformed condition
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Number(f64),
    Op(CompareOp),
    LParen,
    RParen,
}

/// Parse a condition expression string into an AST
pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError {
            message: "empty condition".to_string(),
            position: 0,
        });
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some((tok, at)) = parser.peek() {
        return Err(ParseError {
            message: format!("unexpected {:?}", tok),
            position: at,
        });
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (at, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((Token::LParen, at));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, at));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != quote {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(ParseError {
                        message: "unterminated string".to_string(),
                        position: at,
                    });
                }
                let s: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                tokens.push((Token::Str(s), at));
                i = end + 1;
            }
            '=' | '!' | '>' | '<' => {
                let next = chars.get(i + 1).map(|(_, c)| *c);
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CompareOp::Eq, 2),
                    ('!', Some('=')) => (CompareOp::NotEq, 2),
                    ('>', Some('=')) => (CompareOp::Gte, 2),
                    ('<', Some('=')) => (CompareOp::Lte, 2),
                    ('>', _) => (CompareOp::Gt, 1),
                    ('<', _) => (CompareOp::Lt, 1),
                    _ => {
                        return Err(ParseError {
                            message: format!("unexpected '{}'", c),
                            position: at,
                        })
                    }
                };
                tokens.push((Token::Op(op), at));
                i += width;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let n = text.parse::<f64>().map_err(|_| ParseError {
                    message: format!("invalid number '{}'", text),
                    position: at,
                })?;
                tokens.push((Token::Number(n), at));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let token = if word == "contains" {
                    Token::Op(CompareOp::Contains)
                } else {
                    Token::Path(word)
                };
                tokens.push((token, at));
            }
            other => {
                return Err(ParseError {
                    message: format!("unexpected '{}'", other),
                    position: at,
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, at)| (t, *at))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn end_position(&self) -> usize {
        self.tokens.last().map(|(_, at)| *at + 1).unwrap_or(0)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some((Token::Path(w), _)) if w == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.eat_keyword("not") {
            let inner = self.parse_unary()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let end = self.end_position();
        match self.next() {
            Some((Token::LParen, _)) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((tok, at)) => Err(ParseError {
                        message: format!("expected ')', found {:?}", tok),
                        position: at,
                    }),
                    None => Err(ParseError {
                        message: "expected ')'".to_string(),
                        position: end,
                    }),
                }
            }
            Some((Token::Path(word), _)) if word == "true" => Ok(Expression::True),
            Some((Token::Path(word), _)) if word == "false" => Ok(Expression::False),
            Some((Token::Path(path), at)) => {
                if matches!(path.as_str(), "and" | "or" | "null") {
                    return Err(ParseError {
                        message: format!("expected a state path, found '{}'", path),
                        position: at,
                    });
                }
                match self.peek() {
                    Some((Token::Op(op), _)) => {
                        let op = *op;
                        self.pos += 1;
                        let right = self.parse_literal()?;
                        Ok(Expression::Compare {
                            left: path,
                            op,
                            right,
                        })
                    }
                    _ => Ok(Expression::Truthy(path)),
                }
            }
            Some((tok, at)) => Err(ParseError {
                message: format!("unexpected {:?}", tok),
                position: at,
            }),
            None => Err(ParseError {
                message: "unexpected end of condition".to_string(),
                position: end,
            }),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let end = self.end_position();
        match self.next() {
            Some((Token::Str(s), _)) => Ok(Literal::String(s)),
            Some((Token::Number(n), _)) => Ok(Literal::Number(n)),
            Some((Token::Path(word), at)) => match word.as_str() {
                "true" => Ok(Literal::Boolean(true)),
                "false" => Ok(Literal::Boolean(false)),
                "null" => Ok(Literal::Null),
                _ => Err(ParseError {
                    message: format!("expected a literal, found '{}'", word),
                    position: at,
                }),
            },
            Some((tok, at)) => Err(ParseError {
                message: format!("expected a literal, found {:?}", tok),
                position: at,
            }),
            None => Err(ParseError {
                message: "missing literal".to_string(),
                position: end,
            }),
        }
    }
}
