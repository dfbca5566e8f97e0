//! Calico selector expressions.
//!
//! Only the conjunctive subset maps onto a label selector: `all()`,
//! `k == 'v'`, `k != 'v'`, `has(k)`, `!has(k)`, `k in {..}` and
//! `k not in {..}` joined by `&&`. Disjunction, grouping and string
//! matching operators have no Cilium counterpart and are reported as
//! unsupported rather than approximated.

use std::collections::BTreeMap;

use super::{requirement, ParseError};
use crate::model::{LabelMatch, SelectorOperator};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    EqEq,
    NotEq,
    Not,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
}

/// Parse a Calico selector into a [`LabelMatch`]. `path` locates the
/// selector in the document for error messages.
pub fn parse_selector(raw: &str, path: &str) -> Result<LabelMatch, ParseError> {
    let tokens = tokenize(raw, path)?;
    if tokens.is_empty() {
        return Ok(LabelMatch::default());
    }
    SelectorParser {
        tokens,
        pos: 0,
        path,
        labels: BTreeMap::new(),
        expressions: Vec::new(),
    }
    .run()
}

fn tokenize(raw: &str, path: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|offset| start + offset)
                    .ok_or_else(|| {
                        ParseError::malformed_selector(path, format!("unterminated string in '{raw}'"))
                    })?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if is_key_char(c) => {
                let start = i;
                while i < chars.len() && is_key_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ParseError::malformed_selector(
                    path,
                    format!("unexpected character '{other}' in '{raw}'"),
                ))
            }
        }
    }
    Ok(tokens)
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

struct SelectorParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    path: &'a str,
    labels: BTreeMap<String, String>,
    expressions: Vec<crate::model::LabelRequirement>,
}

impl SelectorParser<'_> {
    fn run(mut self) -> Result<LabelMatch, ParseError> {
        loop {
            self.term()?;
            match self.next() {
                None => break,
                Some(Token::AndAnd) => continue,
                Some(Token::OrOr) => return Err(self.unsupported("'||' disjunction")),
                Some(other) => return Err(self.malformed(format!("unexpected {other:?}"))),
            }
        }
        Ok(LabelMatch::new(self.labels, self.expressions))
    }

    fn term(&mut self) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::Not) => match self.next() {
                Some(Token::Ident(word)) if word == "has" => {
                    let key = self.call_argument()?;
                    self.push(key, SelectorOperator::DoesNotExist, Vec::new())
                }
                Some(Token::LParen) => Err(self.unsupported("negated group")),
                _ => Err(self.malformed("'!' must be followed by has(...)")),
            },
            Some(Token::LParen) => Err(self.unsupported("parenthesised expression")),
            Some(Token::Ident(word)) if self.peek() == Some(&Token::LParen) => {
                match word.as_str() {
                    "all" => {
                        self.expect(Token::LParen)?;
                        self.expect(Token::RParen)
                    }
                    "has" => {
                        let key = self.call_argument()?;
                        self.push(key, SelectorOperator::Exists, Vec::new())
                    }
                    "global" => Err(self.unsupported("global()")),
                    other => Err(self.malformed(format!("unknown function {other}()"))),
                }
            }
            Some(Token::Ident(key)) => self.comparison(key),
            Some(other) => Err(self.malformed(format!("unexpected {other:?}"))),
            None => Err(self.malformed("expression ends early")),
        }
    }

    fn comparison(&mut self, key: String) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::EqEq) => {
                let value = self.string()?;
                match self.labels.get(&key) {
                    Some(existing) if existing != &value => {
                        self.push(key, SelectorOperator::In, vec![value])
                    }
                    _ => {
                        self.labels.insert(key, value);
                        Ok(())
                    }
                }
            }
            Some(Token::NotEq) => {
                let value = self.string()?;
                self.push(key, SelectorOperator::NotIn, vec![value])
            }
            Some(Token::Ident(word)) if word == "in" => {
                let values = self.set()?;
                self.push(key, SelectorOperator::In, values)
            }
            Some(Token::Ident(word)) if word == "not" => match self.next() {
                Some(Token::Ident(word)) if word == "in" => {
                    let values = self.set()?;
                    self.push(key, SelectorOperator::NotIn, values)
                }
                _ => Err(self.malformed("expected 'in' after 'not'")),
            },
            Some(Token::Ident(word)) if matches!(word.as_str(), "contains" | "starts" | "ends") => {
                Err(self.unsupported(format!("'{word}' string match on {key}")))
            }
            _ => Err(self.malformed(format!("expected an operator after {key}"))),
        }
    }

    fn push(
        &mut self,
        key: String,
        operator: SelectorOperator,
        values: Vec<String>,
    ) -> Result<(), ParseError> {
        let req = requirement(key, operator, values, self.path)?;
        self.expressions.push(req);
        Ok(())
    }

    fn call_argument(&mut self) -> Result<String, ParseError> {
        self.expect(Token::LParen)?;
        let key = match self.next() {
            Some(Token::Ident(key)) => key,
            _ => return Err(self.malformed("expected a label key")),
        };
        self.expect(Token::RParen)?;
        Ok(key)
    }

    fn set(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(Token::LBrace)?;
        let mut values = Vec::new();
        loop {
            match self.next() {
                Some(Token::Str(value)) => values.push(value),
                Some(Token::RBrace) if values.is_empty() => break,
                _ => return Err(self.malformed("expected a quoted value in set")),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBrace) => break,
                _ => return Err(self.malformed("expected ',' or '}' in set")),
            }
        }
        Ok(values)
    }

    fn string(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Str(value)) => Ok(value),
            _ => Err(self.malformed("expected a quoted value")),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        match self.next() {
            Some(found) if found == token => Ok(()),
            _ => Err(self.malformed(format!("expected {token:?}"))),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn malformed(&self, detail: impl Into<String>) -> ParseError {
        ParseError::malformed_selector(self.path, detail)
    }

    fn unsupported(&self, what: impl Into<String>) -> ParseError {
        ParseError::unsupported(self.path, format!("{} has no Cilium equivalent", what.into()))
    }
}
