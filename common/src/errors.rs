//! Error types shared by every collector component.
//!
//! Variants follow the three failure classes of the collector: configuration
//! errors abort loading a file, fetch errors abort a single test, dispatch
//! errors are only ever logged.

use thiserror::Error;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Unified error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ---- configuration ----
    /// Generic configuration problem (missing file, bad CLI combination, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// A database, sink, test or column name does not match the identifier grammar.
    #[error("invalid {kind} name: {name}")]
    InvalidIdentifier { kind: &'static str, name: String },

    /// `inherit_from` chain loops back on itself.
    #[error("circular reference tests.{test}.inherit_from={reference} (chain: {chain})")]
    CircularReference {
        test: String,
        reference: String,
        chain: String,
    },

    /// `inherit_from` names a test that does not exist.
    #[error("invalid reference tests.{test}.inherit_from={reference}")]
    MissingReference { test: String, reference: String },

    /// Database driver is empty or not one of the supported drivers.
    #[error("database {database}: {reason}")]
    UnsupportedDriver { database: String, reason: String },

    /// Resolved test is structurally incomplete.
    #[error("test '{test}': {reason}")]
    InvalidTest { test: String, reason: String },

    // ---- fetch ----
    /// Could not open a database connection.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// Query or statement execution failed.
    #[error("database query error: {0}")]
    DatabaseQuery(String),

    /// The probe query did not finish in time.
    #[error("query timed out after {0:?}")]
    QueryTimeout(std::time::Duration),

    /// Result column name is not a safe identifier.
    #[error("invalid column: {0}, only [a-zA-Z][a-zA-Z0-9]* is supported")]
    InvalidColumn(String),

    /// Declared fields absent from a result row.
    #[error("missing fields: {} (specified in 'fields' but missing from result)", .0.join(", "))]
    MissingFields(Vec<String>),

    /// Result column has a type the collector cannot represent.
    #[error("column {column}: unsupported type {type_name}")]
    UnsupportedColumnType { column: String, type_name: String },

    // ---- dispatch ----
    /// Could not build a client for a sink.
    #[error("sink connection error: {0}")]
    SinkConnection(String),

    /// Sink rejected or failed a write.
    #[error("sink write error: {0}")]
    SinkWrite(String),

    // ---- wrapped ----
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Returns a stable code for log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            AppError::CircularReference { .. } => "CIRCULAR_REFERENCE",
            AppError::MissingReference { .. } => "MISSING_REFERENCE",
            AppError::UnsupportedDriver { .. } => "UNSUPPORTED_DRIVER",
            AppError::InvalidTest { .. } => "INVALID_TEST",
            AppError::DatabaseConnection(_) => "DATABASE_CONNECTION_ERROR",
            AppError::DatabaseQuery(_) => "DATABASE_QUERY_ERROR",
            AppError::QueryTimeout(_) => "QUERY_TIMEOUT",
            AppError::InvalidColumn(_) => "INVALID_COLUMN",
            AppError::MissingFields(_) => "MISSING_FIELDS",
            AppError::UnsupportedColumnType { .. } => "UNSUPPORTED_COLUMN_TYPE",
            AppError::SinkConnection(_) => "SINK_CONNECTION_ERROR",
            AppError::SinkWrite(_) => "SINK_WRITE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Yaml(_) => "YAML_ERROR",
            AppError::Json(_) => "JSON_ERROR",
        }
    }

    /// Whether the error belongs to the configuration class.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::InvalidIdentifier { .. }
                | AppError::CircularReference { .. }
                | AppError::MissingReference { .. }
                | AppError::UnsupportedDriver { .. }
                | AppError::InvalidTest { .. }
                | AppError::Yaml(_)
        )
    }
}
