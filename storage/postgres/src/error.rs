use std::fmt;
use std::time::Duration;

use mongres_ql::{FilterError, UpdateError, ValueError};
use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
    #[error("invalid update: {0}")]
    InvalidUpdate(#[from] UpdateError),
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] ValueError),
    #[error("invalid collection name {0:?}")]
    InvalidCollectionName(String),
    #[error("invalid database name {0:?}")]
    InvalidDatabaseName(String),
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
    #[error("duplicate _id {id} in collection {collection:?}")]
    DuplicateKey { collection: String, id: String },
    #[error("not connected to {target}: the pool has been released")]
    NotConnected { target: String },
    #[error("timed out after {timeout:?} waiting for a connection to {target}")]
    PoolExhausted { target: String, timeout: Duration },
    #[error("failed to connect to {target}: {source}")]
    Connection { target: String, source: tokio_postgres::Error },
    #[error("{operation} on collection {collection:?} failed: {source}")]
    Backend { collection: String, operation: Operation, source: tokio_postgres::Error },
    #[error("failed to decode document from collection {collection:?}: {message}")]
    Decode { collection: String, message: String },
}

/// The collection operation a backend error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateTable,
    Insert,
    Find,
    Count,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateTable => "create table",
            Operation::Insert => "insert",
            Operation::Find => "find",
            Operation::Count => "count",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Carries the conflicting key when the server reported it
    UniqueViolation { key: Option<String> },
    UndefinedTable { table: Option<String> },
    UndefinedSchema { schema: Option<String> },
    /// A concurrent `CREATE ... IF NOT EXISTS` lost the race on the catalog
    DuplicateObject,
    Unknown,
}

pub fn error_kind(err: &tokio_postgres::Error) -> ErrorKind {
    let db_error = err.as_db_error();
    match err.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
            // Key (id)=(65f1c0ffee0000000000abcd) already exists.
            let key = db_error.and_then(|e| e.detail()).and_then(|detail| between(detail, "=(", ")"));
            // racing CREATE TABLE / CREATE SCHEMA calls trip the catalog's own unique indexes
            if matches!(db_error.and_then(|e| e.constraint()), Some("pg_type_typname_nsp_index" | "pg_namespace_nspname_index")) {
                return ErrorKind::DuplicateObject;
            }
            ErrorKind::UniqueViolation { key }
        }
        Some(code) if *code == SqlState::UNDEFINED_TABLE => {
            // relation "users" does not exist
            let table = db_error.and_then(|e| between(e.message(), "\"", "\""));
            ErrorKind::UndefinedTable { table }
        }
        Some(code) if *code == SqlState::INVALID_SCHEMA_NAME => {
            // schema "app" does not exist
            let schema = db_error.and_then(|e| between(e.message(), "\"", "\""));
            ErrorKind::UndefinedSchema { schema }
        }
        Some(code) if *code == SqlState::DUPLICATE_TABLE || *code == SqlState::DUPLICATE_OBJECT || *code == SqlState::DUPLICATE_SCHEMA => {
            ErrorKind::DuplicateObject
        }
        _ => ErrorKind::Unknown,
    }
}

fn between(s: &str, open: &str, close: &str) -> Option<String> {
    let start = s.find(open)? + open.len();
    let end = s[start..].find(close)? + start;
    Some(s[start..end].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_fragments() {
        assert_eq!(between("Key (id)=(65f1c0ffee0000000000abcd) already exists.", "=(", ")"), Some("65f1c0ffee0000000000abcd".into()));
        assert_eq!(between(r#"relation "users" does not exist"#, "\"", "\""), Some("users".into()));
        assert_eq!(between("no quotes here", "\"", "\""), None);
    }

    #[test]
    fn operation_names() {
        assert_eq!(Operation::CreateTable.to_string(), "create table");
        assert_eq!(
            Error::Decode { collection: "users".into(), message: "bad".into() }.to_string(),
            r#"failed to decode document from collection "users": bad"#
        );
    }
}
