//! Error types for the ETL library.

use thiserror::Error;

/// Main error type for ETL operations.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Configuration error (invalid YAML, missing fields, bad arguments)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transformer accessor was called before its backing value was set
    #[error("Transformer value not configured: {0}")]
    NotConfigured(&'static str),

    /// Connection could not be established within the retry budget
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Warehouse driver error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Search API request error
    #[error("API error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bulk load failed for a specific table
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// A single row could not be serialized; counted and skipped by the
    /// staging writer, never fatal to a run
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// SQL template rendering failed (unknown slot, unbalanced braces)
    #[error("Template error: {0}")]
    Template(String),

    /// A parallel worker task did not run to completion
    #[error("Task error: {0}")]
    Task(String),

    /// IO error (staging artifact, script files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (run summaries)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    /// Create a Connection error with context about the endpoint
    pub fn connection(message: impl Into<String>, context: impl Into<String>) -> Self {
        EtlError::Connection {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            EtlError::Config(_)
            | EtlError::NotConfigured(_)
            | EtlError::Template(_)
            | EtlError::Yaml(_)
            | EtlError::Json(_) => 1,
            EtlError::Connection { .. } => 2,
            EtlError::Db(_) => 3,
            EtlError::Load { .. } | EtlError::MalformedRow(_) => 4,
            EtlError::Http(_) => 5,
            EtlError::Task(_) => 6,
            EtlError::Io(_) => 7,
        }
    }
}

/// Result type alias for ETL operations.
pub type Result<T> = std::result::Result<T, EtlError>;
