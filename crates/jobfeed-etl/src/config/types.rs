//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Warehouse database configuration.
    pub warehouse: WarehouseConfig,

    /// ETL behavior configuration.
    #[serde(default)]
    pub etl: EtlConfig,

    /// Job-search API configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Credentials the warehouse uses to read staging artifacts during COPY.
    #[serde(default)]
    pub aws: AwsConfig,
}

/// Warehouse database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5439).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema maintenance helpers qualify bare table names with (default: "public").
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .finish()
    }
}

/// ETL behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Connection retries after the first failed attempt (default: 3).
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base backoff delay between connection attempts, in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Worker-pool size for parallel script execution (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Malformed rows tolerated by a COPY before it aborts (default: 10).
    #[serde(default = "default_max_load_errors")]
    pub max_load_errors: u32,

    /// Gzip-compress staging artifacts (default: false).
    #[serde(default)]
    pub compress: bool,

    /// Directory staging artifacts are written to (default: ".").
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Literal token written for NULL values (default: "NULL").
    #[serde(default = "default_null_token")]
    pub null_token: String,

    /// Escape character prefixed to embedded delimiters/newlines (default: '\\').
    #[serde(default = "default_escape_char")]
    pub escape_char: char,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            workers: default_workers(),
            max_load_errors: default_max_load_errors(),
            compress: false,
            staging_dir: default_staging_dir(),
            null_token: default_null_token(),
            escape_char: default_escape_char(),
        }
    }
}

/// Job-search API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Search endpoint base URL.
    #[serde(default)]
    pub base_url: String,

    /// Publisher identifier sent with every search request.
    #[serde(default)]
    pub publisher: String,
}

/// COPY authorization. Either both access keys or an IAM role, never both.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Access key id.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,

    /// IAM role ARN the warehouse assumes to read the artifact.
    #[serde(default)]
    pub iam_role: Option<String>,
}

impl std::fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConfig")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("iam_role", &self.iam_role)
            .finish()
    }
}

fn default_port() -> u16 {
    5439
}

fn default_schema() -> String {
    "public".to_string()
}

pub(crate) fn default_retries() -> u32 {
    3
}

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) fn default_max_load_errors() -> u32 {
    10
}

pub(crate) fn default_staging_dir() -> PathBuf {
    PathBuf::from(".")
}

pub(crate) fn default_null_token() -> String {
    "NULL".to_string()
}

pub(crate) fn default_escape_char() -> char {
    '\\'
}
