//! Topic patterns.
//!
//! Subjects are dot separated tokens (`user.profile.updated`). A pattern is a
//! subject that may use two wildcards:
//!
//! - `*` matches exactly one token,
//! - `>` matches one or more trailing tokens and may only be the last token.
//!
//! Tokens are never empty.

use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors raised when parsing a topic pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The pattern is empty.
    #[error("topic pattern is empty")]
    Empty,

    /// The pattern contains an empty token, as in `a..b`.
    #[error("topic pattern `{0}` contains an empty token")]
    EmptyToken(String),

    /// `>` is used before the last token.
    #[error("topic pattern `{0}` uses `>` before its last token")]
    MisplacedTail(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Token {
    Literal(String),
    Single,
    Tail,
}

/// A parsed topic pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl TopicPattern {
    /// Parse and validate a pattern.
    pub fn parse(pattern: &str) -> Result<Self, TopicError> {
        if pattern.is_empty() {
            return Err(TopicError::Empty);
        }
        let parts: Vec<&str> = pattern.split('.').collect();
        let last = parts.len() - 1;
        let tokens = parts
            .iter()
            .enumerate()
            .map(|(idx, part)| match *part {
                "" => Err(TopicError::EmptyToken(pattern.to_owned())),
                "*" => Ok(Token::Single),
                ">" if idx == last => Ok(Token::Tail),
                ">" => Err(TopicError::MisplacedTail(pattern.to_owned())),
                literal => Ok(Token::Literal(literal.to_owned())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: pattern.to_owned(),
            tokens,
        })
    }

    /// Whether `subject` matches the pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split('.');
        for token in &self.tokens {
            match (token, parts.next()) {
                (_, None) | (_, Some("")) => return false,
                (Token::Tail, Some(_)) => return parts.all(|part| !part.is_empty()),
                (Token::Single, Some(_)) => {}
                (Token::Literal(literal), Some(part)) => {
                    if literal != part {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }

    /// Whether the pattern contains no wildcard.
    pub fn is_literal(&self) -> bool {
        self.tokens
            .iter()
            .all(|token| matches!(token, Token::Literal(_)))
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for TopicPattern {
    type Err = TopicError;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        Self::parse(pattern)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether `subject` matches `pattern`; an invalid pattern matches nothing.
pub fn matches(pattern: &str, subject: &str) -> bool {
    TopicPattern::parse(pattern).is_ok_and(|pattern| pattern.matches(subject))
}
