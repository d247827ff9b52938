//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

const TRUE_TOKENS: [&str; 4] = ["1", "true", "yes", "t"];

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build configuration from an injected environment lookup.
    ///
    /// Unparseable numeric/boolean values fall back to their defaults with
    /// a warning; missing required values are caught by validation.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Config {
            warehouse: WarehouseConfig {
                host: env_str(&lookup, "ETL_DB_HOST", ""),
                port: env_parse(&lookup, "ETL_DB_PORT", 5439),
                database: env_str(&lookup, "ETL_DB_NAME", ""),
                user: env_str(&lookup, "ETL_DB_USER", ""),
                password: env_str(&lookup, "ETL_DB_PASSWORD", ""),
                schema: env_str(&lookup, "ETL_DB_SCHEMA", "public"),
            },
            etl: EtlConfig {
                retries: env_parse(&lookup, "ETL_DB_RETRIES", default_retries()),
                timeout_secs: env_parse(&lookup, "ETL_DB_TIMEOUT", default_timeout_secs()),
                workers: env_parse(&lookup, "ETL_WORKERS", default_workers()),
                max_load_errors: env_parse(&lookup, "ETL_MAX_LOAD_ERRORS", default_max_load_errors()),
                compress: env_bool(&lookup, "ETL_COMPRESS", false),
                staging_dir: lookup("ETL_STAGING_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_staging_dir),
                null_token: env_str(&lookup, "ETL_NULL_TOKEN", &default_null_token()),
                escape_char: default_escape_char(),
            },
            api: ApiConfig {
                base_url: env_str(&lookup, "ETL_API_BASE_URL", ""),
                publisher: env_str(&lookup, "ETL_API_PUBLISHER", ""),
            },
            aws: AwsConfig {
                access_key_id: lookup("AWS_ACCESS_KEY_ID"),
                secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
                iam_role: lookup("ETL_COPY_IAM_ROLE"),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl WarehouseConfig {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

fn env_str<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Unparseable value '{}' for {}, using default {}", raw, key, default);
            default
        }),
        None => default,
    }
}

fn env_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(raw) => TRUE_TOKENS.contains(&raw.to_lowercase().as_str()),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL_YAML: &str = r#"
warehouse:
  host: warehouse.example.com
  database: analytics
  user: etl
  password: secret
"#;

    #[test]
    fn test_minimal_yaml_applies_defaults() {
        let config = Config::from_yaml(MINIMAL_YAML).unwrap();
        assert_eq!(config.warehouse.port, 5439);
        assert_eq!(config.warehouse.schema, "public");
        assert_eq!(config.etl.retries, 3);
        assert_eq!(config.etl.workers, 4);
        assert_eq!(config.etl.null_token, "NULL");
        assert_eq!(config.etl.escape_char, '\\');
        assert!(!config.etl.compress);
    }

    #[test]
    fn test_connection_string() {
        let config = Config::from_yaml(MINIMAL_YAML).unwrap();
        let conn = config.warehouse.connection_string();
        assert!(conn.contains("host=warehouse.example.com"));
        assert!(conn.contains("port=5439"));
        assert!(conn.contains("dbname=analytics"));
    }

    #[test]
    fn test_from_env_with_overrides() {
        let mut env = HashMap::new();
        env.insert("ETL_DB_HOST", "wh.internal");
        env.insert("ETL_DB_NAME", "jobs");
        env.insert("ETL_DB_USER", "loader");
        env.insert("ETL_DB_PASSWORD", "pw");
        env.insert("ETL_DB_RETRIES", "5");
        env.insert("ETL_COMPRESS", "yes");
        env.insert("ETL_WORKERS", "8");
        let config =
            Config::from_env_with(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.warehouse.host, "wh.internal");
        assert_eq!(config.etl.retries, 5);
        assert_eq!(config.etl.workers, 8);
        assert!(config.etl.compress);
    }

    #[test]
    fn test_from_env_bad_int_falls_back() {
        let mut env = HashMap::new();
        env.insert("ETL_DB_HOST", "wh");
        env.insert("ETL_DB_NAME", "jobs");
        env.insert("ETL_DB_USER", "loader");
        env.insert("ETL_DB_RETRIES", "not-a-number");
        let config =
            Config::from_env_with(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.etl.retries, 3);
    }

    #[test]
    fn test_from_env_missing_host_is_config_error() {
        let result = Config::from_env_with(|_| None);
        assert!(result.is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let config = Config::from_yaml(MINIMAL_YAML).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }
}
