//! Transformer interface: raw records to normalized rows, plus the
//! staging schema contract (table name, DDL, field order, artifact name).

use chrono::Utc;
use std::collections::HashMap;

use crate::error::{EtlError, Result};
use crate::extract::Record;
use crate::template::render_template;
use crate::value::Row;

/// Timestamp suffix format for staging artifact names (UTC).
pub const STAGING_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Construction-time staging schema for a transformer: the table name,
/// its CREATE TABLE template and the ordered output fields.
///
/// Accessors for unset values fail with a `NotConfigured` usage error —
/// a bug in transformer construction, not a runtime data error.
#[derive(Debug, Clone, Default)]
pub struct StageSpec {
    table_name: Option<String>,
    ddl_template: Option<String>,
    fields: Option<Vec<String>>,
}

impl StageSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// CREATE TABLE text with a `{table}` slot for the table name.
    pub fn with_ddl_template(mut self, ddl: impl Into<String>) -> Self {
        self.ddl_template = Some(ddl.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn table_name(&self) -> Result<&str> {
        self.table_name
            .as_deref()
            .ok_or(EtlError::NotConfigured("stage_table_name"))
    }

    pub fn ddl_template(&self) -> Result<&str> {
        self.ddl_template
            .as_deref()
            .ok_or(EtlError::NotConfigured("stage_table_ddl"))
    }

    pub fn fields(&self) -> Result<&[String]> {
        self.fields
            .as_deref()
            .ok_or(EtlError::NotConfigured("output_fields"))
    }
}

/// Maps raw records into normalized rows against a fixed field schema.
///
/// `transform` must never fail on malformed input: a bad record yields
/// zero rows (skipped and logged), and every emitted row carries exactly
/// the declared field set.
pub trait Transformer: Send + Sync {
    /// The staging schema this transformer writes against.
    fn spec(&self) -> &StageSpec;

    /// Normalize one record into zero, one or many rows.
    fn transform(&self, record: &Record) -> Vec<Row>;

    /// Staging table name.
    fn stage_table_name(&self) -> Result<&str> {
        self.spec().table_name()
    }

    /// CREATE TABLE statement, rendered against the table name.
    fn stage_table_ddl(&self) -> Result<String> {
        let mut params = HashMap::new();
        params.insert("table".to_string(), self.spec().table_name()?.to_string());
        render_template(self.spec().ddl_template()?, &params)
    }

    /// Ordered output field names; the staging artifact header.
    fn output_fields(&self) -> Result<&[String]> {
        self.spec().fields()
    }

    /// Staging artifact file name: `{table}-{YYYYMMDD_HHMMSS}.tsv`,
    /// timestamped in UTC at call time.
    fn staging_file_name(&self) -> Result<String> {
        Ok(format!(
            "{}-{}.tsv",
            self.spec().table_name()?,
            Utc::now().format(STAGING_TIMESTAMP_FORMAT)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyTransformer {
        spec: StageSpec,
    }

    impl Transformer for EmptyTransformer {
        fn spec(&self) -> &StageSpec {
            &self.spec
        }

        fn transform(&self, _record: &Record) -> Vec<Row> {
            Vec::new()
        }
    }

    #[test]
    fn test_unconfigured_accessors_fail() {
        let transformer = EmptyTransformer {
            spec: StageSpec::new(),
        };
        assert!(matches!(
            transformer.stage_table_name(),
            Err(EtlError::NotConfigured("stage_table_name"))
        ));
        assert!(matches!(
            transformer.stage_table_ddl(),
            Err(EtlError::NotConfigured(_))
        ));
        assert!(matches!(
            transformer.output_fields(),
            Err(EtlError::NotConfigured("output_fields"))
        ));
        assert!(transformer.staging_file_name().is_err());
    }

    #[test]
    fn test_configured_spec_round_trip() {
        let transformer = EmptyTransformer {
            spec: StageSpec::new()
                .with_table_name("jobs_stage")
                .with_ddl_template("create table {table} (jobkey VARCHAR(30))")
                .with_fields(["jobkey"]),
        };
        assert_eq!(transformer.stage_table_name().unwrap(), "jobs_stage");
        assert_eq!(
            transformer.stage_table_ddl().unwrap(),
            "create table jobs_stage (jobkey VARCHAR(30))"
        );
        assert_eq!(transformer.output_fields().unwrap(), ["jobkey"]);
    }

    #[test]
    fn test_staging_file_name_shape() {
        let transformer = EmptyTransformer {
            spec: StageSpec::new().with_table_name("jobs_stage"),
        };
        let name = transformer.staging_file_name().unwrap();
        assert!(name.starts_with("jobs_stage-"));
        assert!(name.ends_with(".tsv"));
        // jobs_stage- + YYYYMMDD_HHMMSS + .tsv
        assert_eq!(name.len(), "jobs_stage-".len() + 15 + 4);
    }
}
