//! Reply parsing
//!
//! Device replies are whitespace separated numbers, optionally preceded by
//! echoed command letters. Parsing happens in two separate flattening steps:
//!
//! 1. [`parse_record`]: a record with a single numeric line becomes that
//!    line's value, otherwise the list of line values.
//! 2. [`BatchReply::assemble`]: a batch of one command becomes that command's
//!    reply, otherwise the list of replies.
//!
//! So `"42"` reads as a scalar, while multi-line or multi-command replies
//! keep their structure.

use serde::Serialize;
use std::fmt;

use super::ProtocolError;

/// One numeric token
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    /// Token without a decimal point
    Integer(i64),
    /// Token containing a decimal point
    Float(f64),
}

impl Number {
    /// Classify and parse a token: floats contain a '.', everything else is an integer
    pub fn parse(token: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidReply {
            token: token.to_string(),
        };
        if token.contains('.') {
            token.parse().map(Number::Float).map_err(|_| invalid())
        } else {
            token.parse().map(Number::Integer).map_err(|_| invalid())
        }
    }

    /// Integer value, `None` for floats
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Number::Integer(v) => Some(v),
            Number::Float(_) => None,
        }
    }

    /// Numeric value as a float, whatever the token class
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Integer(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    /// True for tokens written with a decimal point
    pub fn is_float(&self) -> bool {
        matches!(self, Number::Float(_))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(v) => write!(f, "{}", v),
            Number::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// Value of one reply line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParsedValue {
    /// Exactly one number
    Number(Number),
    /// Two or more numbers from the same line
    Tuple(Vec<Number>),
    /// Only echoed text, no numbers
    Empty,
}

impl ParsedValue {
    /// The number if the line held exactly one
    pub fn as_number(&self) -> Option<Number> {
        match self {
            ParsedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer value of a single-number line
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(|n| n.as_i64())
    }

    /// Value of a single-number line as a float
    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(|n| n.as_f64())
    }

    /// Numbers of a multi-number line
    pub fn as_tuple(&self) -> Option<&[Number]> {
        match self {
            ParsedValue::Tuple(v) => Some(v),
            _ => None,
        }
    }

    /// True if the line held no numbers
    pub fn is_empty(&self) -> bool {
        matches!(self, ParsedValue::Empty)
    }
}

/// Reply to one command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    /// Exactly one numeric line
    Value(ParsedValue),
    /// Zero or several numeric lines
    Lines(Vec<ParsedValue>),
}

impl CommandReply {
    /// The value of a single-line reply
    pub fn value(&self) -> Option<&ParsedValue> {
        match self {
            CommandReply::Value(v) => Some(v),
            CommandReply::Lines(_) => None,
        }
    }

    /// The lines of a multi-line (or empty) reply
    pub fn lines(&self) -> Option<&[ParsedValue]> {
        match self {
            CommandReply::Lines(v) => Some(v),
            CommandReply::Value(_) => None,
        }
    }

    /// Integer value of a single-number reply
    pub fn as_i64(&self) -> Option<i64> {
        self.value().and_then(ParsedValue::as_i64)
    }

    /// Numbers of a single-line reply with several numbers
    pub fn as_tuple(&self) -> Option<&[Number]> {
        self.value().and_then(ParsedValue::as_tuple)
    }
}

/// Replies to one write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchReply {
    /// One reply was requested
    Single(CommandReply),
    /// Several replies were requested, in command order
    Many(Vec<CommandReply>),
}

impl BatchReply {
    /// Command-level flattening
    pub fn assemble(mut replies: Vec<CommandReply>) -> Self {
        if replies.len() == 1 {
            BatchReply::Single(replies.remove(0))
        } else {
            BatchReply::Many(replies)
        }
    }

    /// The reply when exactly one was requested
    pub fn single(&self) -> Option<&CommandReply> {
        match self {
            BatchReply::Single(r) => Some(r),
            BatchReply::Many(_) => None,
        }
    }

    /// All replies when several were requested
    pub fn commands(&self) -> Option<&[CommandReply]> {
        match self {
            BatchReply::Many(v) => Some(v),
            BatchReply::Single(_) => None,
        }
    }

    /// Reply `index`, treating a single reply as a batch of one
    pub fn get(&self, index: usize) -> Option<&CommandReply> {
        match self {
            BatchReply::Single(r) if index == 0 => Some(r),
            BatchReply::Single(_) => None,
            BatchReply::Many(v) => v.get(index),
        }
    }

    /// Number of command replies
    pub fn len(&self) -> usize {
        match self {
            BatchReply::Single(_) => 1,
            BatchReply::Many(v) => v.len(),
        }
    }

    /// True if no reply was requested
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse one text line. Tokens starting with a letter are echoed text and dropped.
pub fn parse_line(line: &str) -> Result<ParsedValue, ProtocolError> {
    let mut numbers = line
        .split_whitespace()
        .filter(|t| !t.starts_with(|c: char| c.is_alphabetic()))
        .map(Number::parse)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match numbers.len() {
        0 => ParsedValue::Empty,
        1 => ParsedValue::Number(numbers.remove(0)),
        _ => ParsedValue::Tuple(numbers),
    })
}

/// Parse one record; lines without numbers are omitted
pub fn parse_record(record: &str) -> Result<CommandReply, ProtocolError> {
    let mut values = Vec::new();
    for line in record.split(['\r', '\n']) {
        let value = parse_line(line)?;
        if !value.is_empty() {
            values.push(value);
        }
    }
    if values.len() == 1 {
        Ok(CommandReply::Value(values.remove(0)))
    } else {
        Ok(CommandReply::Lines(values))
    }
}
