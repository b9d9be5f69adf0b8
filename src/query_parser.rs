// Copyright 2025 Cowboy AI, LLC.

//! Boolean query grammar
//!
//! ```text
//! Query   := OrExpr
//! OrExpr  := AndExpr ("OR" AndExpr)*
//! AndExpr := NotTerm ("AND" NotTerm)*
//! NotTerm := ["NOT"] Atom
//! Atom    := Field ":" Value ["*"] ["^" Number] | "(" OrExpr ")" ["^" Number]
//! Value   := word | "quoted phrase" | "[" bound "TO" bound "]"
//! ```
//!
//! Keywords are case-sensitive. `NOT` wraps an already boosted atom, so
//! `NOT a:x^2` parses as `not(boost(a:x, 2))`. The result is always an `Or` of
//! `And` groups, even for a single term.
//!
//! ```
//! use cim_term_store::query_parser::{parse_query, FieldTerm, TermValue};
//! use cim_term_store::specification::{and, leaf, or, Specification};
//!
//! let spec: Specification<FieldTerm> = parse_query("a:x").unwrap();
//! assert_eq!(spec, or([and([leaf(FieldTerm::new("a", TermValue::Exact("x".into())))])]));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ParseError;
use crate::specification::{boost, not, Specification};

/// Value side of a `field:value` term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermValue {
    /// Plain word
    Exact(String),
    /// Double-quoted phrase
    Phrase(String),
    /// Word followed by `*`
    Prefix(String),
    /// `[lower TO upper]`, `*` leaves a bound open
    Range {
        /// Inclusive lower bound
        lower: Option<String>,
        /// Inclusive upper bound
        upper: Option<String>,
    },
}

impl TermValue {
    /// Literal text for exact, phrase and prefix values
    pub fn text(&self) -> Option<&str> {
        match self {
            TermValue::Exact(s) | TermValue::Phrase(s) | TermValue::Prefix(s) => Some(s),
            TermValue::Range { .. } => None,
        }
    }
}

impl fmt::Display for TermValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermValue::Exact(s) => write!(f, "{s}"),
            TermValue::Phrase(s) => write!(f, "{s:?}"),
            TermValue::Prefix(s) => write!(f, "{s}*"),
            TermValue::Range { lower, upper } => write!(
                f,
                "[{} TO {}]",
                lower.as_deref().unwrap_or("*"),
                upper.as_deref().unwrap_or("*")
            ),
        }
    }
}

/// Parsed `field:value` term before it is mapped to a domain criterion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldTerm {
    /// Dotted field path as written
    pub field: String,
    /// Value
    pub value: TermValue,
}

impl FieldTerm {
    /// Create a term
    pub fn new(field: impl Into<String>, value: TermValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl fmt::Display for FieldTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.value)
    }
}

/// Maps parsed terms to domain leaves
///
/// Unknown fields must map to a leaf rather than fail; an `Err` is reserved for
/// malformed values of known fields and is reported at the value token.
pub trait FromTerm: Sized {
    /// Build a leaf from a term
    fn from_term(term: &FieldTerm) -> Result<Self, String>;
}

impl FromTerm for FieldTerm {
    fn from_term(term: &FieldTerm) -> Result<Self, String> {
        Ok(term.clone())
    }
}

/// Parse query text into a specification tree
pub fn parse_query<C: FromTerm>(input: &str) -> Result<Specification<C>, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: input.len(),
    };
    let spec = parser.or_expr()?;
    match parser.peek() {
        None => Ok(spec),
        Some(token) => Err(token.error("unexpected token after complete query")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Colon,
    Star,
    Caret,
    Word(String),
    Phrase(String),
    Range {
        lower: Option<String>,
        upper: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
    text: String,
}

impl Token {
    fn error(&self, message: &str) -> ParseError {
        ParseError::new(self.position, self.text.clone(), message)
    }
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
    value_mode: bool,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            value_mode: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.offset..]
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.rest().chars().next() {
            if ch.is_whitespace() {
                self.offset += ch.len_utf8();
                continue;
            }
            let start = self.offset;
            let kind = match ch {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                ':' if !self.value_mode => {
                    self.offset += 1;
                    self.value_mode = true;
                    tokens.push(Token {
                        kind: TokenKind::Colon,
                        position: start,
                        text: ":".to_string(),
                    });
                    continue;
                }
                '*' => self.single(TokenKind::Star),
                '^' => self.single(TokenKind::Caret),
                '"' if self.value_mode => self.phrase()?,
                '[' if self.value_mode => self.range()?,
                _ => {
                    let word = self.word();
                    if self.value_mode {
                        TokenKind::Word(word)
                    } else {
                        match word.as_str() {
                            "AND" => TokenKind::And,
                            "OR" => TokenKind::Or,
                            "NOT" => TokenKind::Not,
                            _ => TokenKind::Word(word),
                        }
                    }
                }
            };
            self.value_mode = false;
            tokens.push(Token {
                kind,
                position: start,
                text: self.input[start..self.offset].to_string(),
            });
        }
        Ok(tokens)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.offset += 1;
        kind
    }

    fn word(&mut self) -> String {
        let value_mode = self.value_mode;
        let len = self
            .rest()
            .char_indices()
            .find(|&(_, c)| {
                c.is_whitespace()
                    || matches!(c, '(' | ')' | '^' | '*')
                    || (!value_mode && matches!(c, ':' | '"'))
            })
            .map(|(i, _)| i)
            .unwrap_or(self.rest().len());
        // A lone terminator still has to move the cursor forward.
        let len = if len == 0 {
            self.rest().chars().next().map_or(0, char::len_utf8)
        } else {
            len
        };
        let word = self.rest()[..len].to_string();
        self.offset += len;
        word
    }

    fn phrase(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.offset;
        self.offset += 1;
        let mut text = String::new();
        let mut escaped = false;
        for (i, c) in self.rest().char_indices() {
            if escaped {
                text.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                self.offset += i + 1;
                return Ok(TokenKind::Phrase(text));
            } else {
                text.push(c);
            }
        }
        Err(ParseError::new(
            start,
            &self.input[start..],
            "unterminated quoted phrase",
        ))
    }

    fn range(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.offset;
        let Some(close) = self.rest().find(']') else {
            return Err(ParseError::new(start, &self.input[start..], "unterminated range"));
        };
        let body = &self.rest()[1..close];
        let bounds: Vec<&str> = body.split_whitespace().collect();
        let token = &self.input[start..start + close + 1];
        let (lower, upper) = match bounds.as_slice() {
            [lower, "TO", upper] => (bound(lower), bound(upper)),
            _ => {
                return Err(ParseError::new(
                    start,
                    token,
                    "expected range of the form [lower TO upper]",
                ))
            }
        };
        self.offset += close + 1;
        Ok(TokenKind::Range { lower, upper })
    }
}

fn bound(text: &str) -> Option<String> {
    (text != "*").then(|| text.to_string())
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn end_error(&self, message: &str) -> ParseError {
        ParseError::new(self.end, ParseError::END_OF_INPUT, message)
    }

    fn or_expr<C: FromTerm>(&mut self) -> Result<Specification<C>, ParseError> {
        let mut groups = vec![self.and_expr()?];
        while self.peek_kind() == Some(&TokenKind::Or) {
            self.next();
            groups.push(self.and_expr()?);
        }
        Ok(Specification::Or(groups))
    }

    fn and_expr<C: FromTerm>(&mut self) -> Result<Specification<C>, ParseError> {
        let mut terms = vec![self.not_term()?];
        while self.peek_kind() == Some(&TokenKind::And) {
            self.next();
            terms.push(self.not_term()?);
        }
        Ok(Specification::And(terms))
    }

    fn not_term<C: FromTerm>(&mut self) -> Result<Specification<C>, ParseError> {
        if self.peek_kind() == Some(&TokenKind::Not) {
            self.next();
            return Ok(not(self.atom()?));
        }
        self.atom()
    }

    fn atom<C: FromTerm>(&mut self) -> Result<Specification<C>, ParseError> {
        let Some(token) = self.next() else {
            return Err(self.end_error("expected a term"));
        };
        let spec = match token.kind {
            TokenKind::LParen => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => inner,
                    Some(other) => return Err(other.error("expected ')'")),
                    None => return Err(self.end_error("unbalanced parenthesis, expected ')'")),
                }
            }
            TokenKind::Word(ref field) => {
                let field = field.clone();
                self.field_term(&token, field)?
            }
            TokenKind::RParen => return Err(token.error("unbalanced parenthesis")),
            TokenKind::And | TokenKind::Or | TokenKind::Not => {
                return Err(token.error("unexpected operator, expected a term"))
            }
            _ => return Err(token.error("expected a field name or '('")),
        };
        self.boost(spec)
    }

    fn field_term<C: FromTerm>(
        &mut self,
        field_token: &Token,
        field: String,
    ) -> Result<Specification<C>, ParseError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Colon,
                ..
            }) => {}
            Some(other) => return Err(other.error("expected ':' after field name")),
            None => return Err(field_token.error("expected ':' after field name")),
        }
        let Some(value_token) = self.next() else {
            return Err(self.end_error("expected a value"));
        };
        let value = match &value_token.kind {
            TokenKind::Word(word) => {
                if self.peek_kind() == Some(&TokenKind::Star) {
                    self.next();
                    TermValue::Prefix(word.clone())
                } else {
                    TermValue::Exact(word.clone())
                }
            }
            TokenKind::Phrase(phrase) => TermValue::Phrase(phrase.clone()),
            TokenKind::Range { lower, upper } => TermValue::Range {
                lower: lower.clone(),
                upper: upper.clone(),
            },
            _ => return Err(value_token.error("expected a value")),
        };
        if let Some(star) = self.peek().filter(|t| t.kind == TokenKind::Star) {
            return Err(star.error("prefix wildcard is only allowed after a plain value"));
        }
        let term = FieldTerm { field, value };
        C::from_term(&term)
            .map(Specification::Leaf)
            .map_err(|message| value_token.error(&message))
    }

    fn boost<C>(&mut self, spec: Specification<C>) -> Result<Specification<C>, ParseError> {
        if self.peek_kind() != Some(&TokenKind::Caret) {
            return Ok(spec);
        }
        self.next();
        let number = match self.next() {
            Some(token) => token,
            None => return Err(self.end_error("expected a boost weight after '^'")),
        };
        let weight = match &number.kind {
            TokenKind::Word(text) => text.parse::<f32>().ok(),
            _ => None,
        };
        match weight {
            Some(w) if w.is_finite() && w > 0.0 => Ok(boost(spec, w)),
            _ => Err(number.error("boost weight must be a positive number")),
        }
    }
}
