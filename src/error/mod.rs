//! Error types for the threshold engine.
//!
//! This module defines a hierarchical error system:
//! - [`AppError`]: Top-level application errors
//! - [`StorageError`]: Key-value store errors
//! - [`EngineError`]: Threshold engine operation errors
//! - [`ConfigError`]: Configuration errors
//!
//! Not having enough history is not an error. Analysis and adjustment report
//! it as a status variant so callers can tell "too early" apart from a
//! failure.
//!
//! All errors implement `Send + Sync` for async compatibility.

use thiserror::Error;

use crate::cli::CommandParseError;

/// Top-level application error.
///
/// This is the error type returned by the binary's command dispatch.
/// It wraps all subsystem errors for unified error handling.
#[derive(Debug, Error)]
pub enum AppError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Command line error.
    #[error("Command error: {0}")]
    Cli(#[from] CommandParseError),

    /// A result could not be rendered as JSON.
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Storage errors.
///
/// These errors represent failures of the backing key-value store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Failed to connect to the database.
    #[error("Database connection failed: {message}")]
    ConnectionFailed {
        /// Description of the connection failure.
        message: String,
    },

    /// A database query failed.
    #[error("Query failed: {query} - {message}")]
    QueryFailed {
        /// The query that failed (may be truncated).
        query: String,
        /// Description of the failure.
        message: String,
    },

    /// Database migration failed.
    #[error("Migration failed: {version} - {message}")]
    MigrationFailed {
        /// The migration version that failed.
        version: String,
        /// Description of the failure.
        message: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization failed for key {key}: {message}")]
    Serialization {
        /// The key being read or written.
        key: String,
        /// Description of the failure.
        message: String,
    },

    /// The store cannot be reached.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of why the store is unavailable.
        message: String,
    },
}

/// Threshold engine errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A metric name outside the fixed set.
    #[error("Unknown metric: {name}")]
    UnknownMetric {
        /// The name that was not recognised.
        name: String,
    },

    /// A threshold pair that is not finite or breaks severity ordering.
    #[error("Invalid threshold for {metric}: {reason}")]
    InvalidThreshold {
        /// The metric being overridden.
        metric: String,
        /// Why the pair was rejected.
        reason: String,
    },

    /// A per-metric data source failed unexpectedly.
    ///
    /// The collector records the metric as unavailable and carries on.
    #[error("Collection failed for {metric}: {message}")]
    Collection {
        /// The metric whose source failed.
        metric: String,
        /// Description of the failure.
        message: String,
    },

    /// The backing store failed; nothing was committed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),

    /// An engine configuration update was rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The threshold service task is not running.
    #[error("Threshold service unavailable: {message}")]
    ServiceUnavailable {
        /// Description of the failure.
        message: String,
    },
}

/// Configuration errors.
///
/// These errors represent failures in configuration loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required configuration is missing.
    #[error("Missing required: {var}")]
    MissingRequired {
        /// The missing variable name.
        var: String,
    },

    /// Configuration value is invalid.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The variable name.
        var: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A configuration key that does not exist.
    #[error("Unknown configuration key: {key}")]
    UnknownKey {
        /// The unrecognised key.
        key: String,
    },
}
