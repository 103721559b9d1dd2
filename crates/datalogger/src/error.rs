// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy.
//!
//! Each layer returns its own typed failure; the coordinator decides what is
//! fatal for a run and what only retains the batch.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file '{}' could not be read: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not decode JSON from '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sink '{sink}' is missing required field '{field}'")]
    MissingField { sink: String, field: &'static str },

    #[error("Sink '{sink}' is malformed: {reason}")]
    InvalidSink { sink: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Record store errors.
///
/// Read-path failures leave the store untouched; a failed `mark_published`
/// rolls back, so callers never observe a partial effect.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to create database directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database I/O failure while {context}: {source}")]
    IoFailure {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl StoreError {
    /// Classify a rusqlite error raised while performing `context`.
    pub(crate) fn from_sqlite(context: &'static str, err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| format!("{} while {}", code, context)),
                )
            }
            other => StoreError::IoFailure {
                context,
                source: other,
            },
        }
    }
}

/// Sink delivery errors. Any of these retains the whole batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("endpoint answered with HTTP status {0}")]
    HttpStatus(u16),

    #[error("message for reading {0} was not acknowledged in time")]
    PublishTimeout(i64),

    #[error("could not encode batch payload: {0}")]
    Encode(String),
}

/// Errors that end a publish run before or outside sink dispatch.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_failure_is_classified() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("NOT NULL constraint failed: readings.data".into()),
        );
        match StoreError::from_sqlite("inserting reading", err) {
            StoreError::ConstraintViolation(msg) => assert!(msg.contains("NOT NULL")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_failures_are_io() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(
            StoreError::from_sqlite("counting readings", err),
            StoreError::IoFailure { .. }
        ));
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(
            SinkError::HttpStatus(503).to_string(),
            "endpoint answered with HTTP status 503"
        );
        assert_eq!(
            SinkError::PublishTimeout(7).to_string(),
            "message for reading 7 was not acknowledged in time"
        );
    }
}
