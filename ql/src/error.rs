use std::convert::Infallible;
use std::fmt;

use thiserror::Error;

/// Errors converting external data into a [`Value`](crate::Value) or [`Document`](crate::Document)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("value nesting exceeds the maximum depth of {0}")]
    DepthExceeded(usize),
    #[error("expected an object, got {0}")]
    NotAnObject(&'static str),
    #[error("invalid _id {0:?}: expected 24 lowercase hex characters")]
    InvalidId(String),
    #[error("_id must be a string, got {0}")]
    IdNotAString(&'static str),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ValueError {
    fn from(err: serde_json::Error) -> Self { ValueError::Serialization(err.to_string()) }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,
    #[error("field path {0:?} contains an empty segment")]
    EmptySegment(String),
    #[error("field path {0:?} contains a segment starting with '$'")]
    OperatorSegment(String),
}

/// Errors rejecting a filter document before any statement is built
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("filter must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("unknown filter operator {0}")]
    UnknownOperator(String),
    #[error("{operator} expects {expected}, got {found}")]
    InvalidOperand { operator: String, expected: &'static str, found: &'static str },
    #[error("condition for {0:?} mixes operators and field names")]
    MixedCondition(String),
    #[error("invalid field path: {0}")]
    Path(#[from] PathError),
    #[error("invalid filter value: {0}")]
    Value(#[from] ValueError),
}

impl From<Infallible> for FilterError {
    fn from(_: Infallible) -> Self { unreachable!("Infallible can never be constructed") }
}

/// Errors rejecting an update document, either while parsing it or while applying it to a stored document
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UpdateError {
    #[error("update must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("update document contains no operators")]
    Empty,
    #[error("unknown update operator {0}")]
    UnknownOperator(String),
    #[error("update keys must be operators, found field {0:?}")]
    NotAnOperator(String),
    #[error("{operator} expects an object of field paths, got {found}")]
    OperatorOperand { operator: String, found: &'static str },
    #[error("{operator} expects {expected} for {path:?}, got {found}")]
    InvalidOperand { operator: &'static str, path: String, expected: &'static str, found: &'static str },
    #[error("{0} cannot modify the immutable field _id")]
    ImmutableId(String),
    #[error("cannot apply {operator} to {path:?}: {reason}")]
    Conflict { operator: &'static str, path: String, reason: ConflictReason },
    #[error("invalid field path: {0}")]
    Path(#[from] PathError),
    #[error("invalid update value: {0}")]
    Value(#[from] ValueError),
}

impl From<Infallible> for UpdateError {
    fn from(_: Infallible) -> Self { unreachable!("Infallible can never be constructed") }
}

/// Why an update operator could not be applied to the value it found in a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// `$inc` found an existing value that is not a number
    NotANumber,
    /// `$push` found an existing value that is not an array
    NotAnArray,
    /// a value on the way to the target is neither an object nor an indexable array
    NotAContainer,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::NotANumber => write!(f, "existing value is not a number"),
            ConflictReason::NotAnArray => write!(f, "existing value is not an array"),
            ConflictReason::NotAContainer => write!(f, "an intermediate value is not a container"),
        }
    }
}
