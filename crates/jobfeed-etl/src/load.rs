//! Bulk loader: rebuilds the staging table and drives the warehouse's
//! native COPY, including load-error introspection and row-count
//! reconciliation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{AwsConfig, Config};
use crate::error::{EtlError, Result};
use crate::pool::{PooledConn, WarehousePool};
use crate::transform::Transformer;

/// Relation the warehouse records per-row COPY failures in. Detection and
/// the diagnostics query both key off this one name; if the target
/// warehouse grows a structured diagnostic channel, this is the only
/// place to change.
pub const LOAD_ERROR_RELATION: &str = "stl_load_errors";

/// One structured error row from a partially failed COPY.
#[derive(Debug, Clone)]
pub struct LoadDiagnostic {
    pub filename: String,
    pub err_reason: String,
    pub colname: String,
    pub col_type: String,
    pub raw_field_value: String,
    pub raw_line: String,
    pub line_number: String,
}

impl LoadDiagnostic {
    fn format_detailed(&self) -> String {
        format!(
            "File: '{}' Error: '{}' FieldName: '{}' FieldType: '{}' ReceivedValue: '{}' RawLine: '{}'",
            self.filename,
            self.err_reason,
            self.colname,
            self.col_type,
            self.raw_field_value,
            self.raw_line
        )
    }
}

/// Outcome of one `load` call.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Affected-row count reconciled from server notices.
    pub rows_loaded: u64,
    /// The warehouse rejected at least one row (within tolerance).
    pub upload_error: bool,
    /// Structured per-row errors when `upload_error` is set.
    pub diagnostics: Vec<LoadDiagnostic>,
    /// No artifact was resolvable; the COPY was skipped entirely.
    pub skipped: bool,
}

impl LoadReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// COPY authorization, chosen by configuration. Access keys and an IAM
/// role are mutually exclusive.
#[derive(Debug, Clone)]
pub enum CopyAuth {
    Keys {
        access_key_id: String,
        secret_access_key: String,
    },
    IamRole(String),
}

impl CopyAuth {
    pub fn from_config(aws: &AwsConfig) -> Result<Self> {
        if let Some(role) = &aws.iam_role {
            return Ok(CopyAuth::IamRole(role.clone()));
        }
        match (&aws.access_key_id, &aws.secret_access_key) {
            (Some(key), Some(secret)) => Ok(CopyAuth::Keys {
                access_key_id: key.clone(),
                secret_access_key: secret.clone(),
            }),
            _ => Err(EtlError::Config(
                "COPY requires either aws access keys or aws.iam_role".into(),
            )),
        }
    }

    fn clause(&self) -> String {
        match self {
            CopyAuth::Keys {
                access_key_id,
                secret_access_key,
            } => format!(
                "ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{}'",
                access_key_id, secret_access_key
            ),
            CopyAuth::IamRole(arn) => format!("IAM_ROLE '{}'", arn),
        }
    }
}

/// Loads a staging artifact into its staging table with the warehouse's
/// native COPY.
///
/// `rebuild_stage_table` must run before `load`; the loader never creates
/// tables implicitly during a load.
pub struct BulkLoader {
    pool: Arc<WarehousePool>,
    table_name: String,
    table_ddl: String,
    schema: String,
    artifact: Option<PathBuf>,
    null_token: String,
    max_errors: u32,
    gzip: bool,
    auth: CopyAuth,
}

impl BulkLoader {
    pub fn new<T>(pool: Arc<WarehousePool>, transformer: &T, config: &Config) -> Result<Self>
    where
        T: Transformer + ?Sized,
    {
        Ok(Self {
            pool,
            table_name: transformer.stage_table_name()?.to_string(),
            table_ddl: transformer.stage_table_ddl()?,
            schema: config.warehouse.schema.clone(),
            artifact: None,
            null_token: config.etl.null_token.clone(),
            max_errors: config.etl.max_load_errors,
            gzip: config.etl.compress,
            auth: CopyAuth::from_config(&config.aws)?,
        })
    }

    /// Set the artifact a bare `load(None, ..)` call will copy from.
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Drop (CASCADE) and recreate the staging table, or — with
    /// `recreate` false — create it only if it does not already exist.
    pub async fn rebuild_stage_table(&self, recreate: bool) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let result = self.rebuild_on(&conn, recreate).await;
        self.pool.release(conn).await;
        result
    }

    async fn rebuild_on(&self, conn: &PooledConn, recreate: bool) -> Result<()> {
        if recreate {
            info!("Rebuilding stage table {}", self.table_name);
            conn.client()
                .batch_execute(&format!(
                    "DROP TABLE IF EXISTS {} CASCADE",
                    self.table_name
                ))
                .await?;
            conn.client().batch_execute(&self.table_ddl).await?;
            return Ok(());
        }

        if !self.stage_table_exists(conn).await? {
            info!("Creating missing stage table {}", self.table_name);
            conn.client().batch_execute(&self.table_ddl).await?;
        }
        Ok(())
    }

    async fn stage_table_exists(&self, conn: &PooledConn) -> Result<bool> {
        let sql = r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
        "#;
        let row = conn
            .client()
            .query_one(sql, &[&self.schema, &self.table_name])
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    /// Copy the staging artifact into the staging table.
    ///
    /// With no resolvable artifact this is a no-op success — zero new
    /// data is legitimate. A partial failure within the error tolerance
    /// surfaces diagnostics and the upload-error flag; whether the
    /// partially loaded rows are kept is the caller's choice via
    /// `rollback_on_upload_error`. A fatal COPY error (tolerance
    /// exceeded, internal error) always rolls back, logs diagnostics and
    /// re-raises.
    pub async fn load(
        &self,
        artifact: Option<&Path>,
        rollback_on_upload_error: bool,
    ) -> Result<LoadReport> {
        let path = match artifact.or(self.artifact.as_deref()) {
            Some(path) => path.to_path_buf(),
            None => {
                warn!("No staging artifact to load; skipping COPY");
                return Ok(LoadReport::skipped());
            }
        };

        let mut conn = self.pool.acquire().await?;
        let result = self
            .copy_artifact(&mut conn, &path, rollback_on_upload_error)
            .await;
        self.pool.release(conn).await;
        result
    }

    async fn copy_artifact(
        &self,
        conn: &mut PooledConn,
        path: &Path,
        rollback_on_upload_error: bool,
    ) -> Result<LoadReport> {
        let statement = self.copy_statement(path);
        // stale notices from a previous borrower must not be attributed
        // to this COPY
        conn.drain_notices();

        conn.begin().await?;
        info!("COPY from '{}' into {}", path.display(), self.table_name);
        debug!("{}", statement);

        if let Err(copy_err) = conn.client().batch_execute(&statement).await {
            error!(
                "COPY into {} failed: error tolerance ({}) reached or internal error; rolling back",
                self.table_name, self.max_errors
            );
            conn.rollback().await?;
            match self.fetch_diagnostics(conn).await {
                Ok(diagnostics) => log_diagnostics(&diagnostics),
                Err(e) => warn!("Could not fetch load diagnostics: {}", e),
            }
            return Err(copy_err.into());
        }

        let notices = conn.drain_notices();
        let (rows_loaded, upload_error) = scan_notices(&self.table_name, &notices);

        if upload_error {
            let diagnostics = self.fetch_diagnostics(conn).await?;
            log_diagnostics(&diagnostics);
            if rollback_on_upload_error {
                conn.rollback().await?;
            } else {
                conn.commit().await?;
            }
            return Ok(LoadReport {
                rows_loaded,
                upload_error: true,
                diagnostics,
                skipped: false,
            });
        }

        conn.commit().await?;
        info!("Loaded {} rows into {}", rows_loaded, self.table_name);
        Ok(LoadReport {
            rows_loaded,
            upload_error: false,
            diagnostics: Vec::new(),
            skipped: false,
        })
    }

    fn copy_statement(&self, path: &Path) -> String {
        let gzip = if self.gzip { " GZIP" } else { "" };
        format!(
            "COPY {} FROM '{}' {} DELIMITER '\t' NULL AS '{}' ESCAPE IGNOREHEADER 1 MAXERROR {}{}",
            self.table_name,
            path.display(),
            self.auth.clause(),
            self.null_token,
            self.max_errors,
            gzip
        )
    }

    /// Fetch the structured error rows for the most recent COPY on this
    /// session. Runs over the simple query protocol so the query
    /// identifier's integer width never matters.
    async fn fetch_diagnostics(&self, conn: &PooledConn) -> Result<Vec<LoadDiagnostic>> {
        let rows = conn
            .client()
            .simple_query("SELECT pg_last_copy_id()")
            .await?;
        let query_id = first_row_field(&rows).ok_or_else(|| {
            EtlError::load(&self.table_name, "pg_last_copy_id() returned no row")
        })?;

        let sql = format!(
            "SELECT raw_line, filename, line_number, colname, type, raw_field_value, err_reason \
             FROM pg_catalog.{} WHERE query = {}",
            LOAD_ERROR_RELATION, query_id
        );
        let messages = conn.client().simple_query(&sql).await?;

        let mut diagnostics = Vec::new();
        for message in &messages {
            if let tokio_postgres::SimpleQueryMessage::Row(row) = message {
                let field = |idx: usize| {
                    row.get(idx)
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default()
                };
                diagnostics.push(LoadDiagnostic {
                    raw_line: field(0),
                    filename: field(1),
                    line_number: field(2),
                    colname: field(3),
                    col_type: field(4),
                    raw_field_value: field(5),
                    err_reason: field(6),
                });
            }
        }
        Ok(diagnostics)
    }
}

fn log_diagnostics(diagnostics: &[LoadDiagnostic]) {
    for diagnostic in diagnostics {
        error!("{}: {}", LOAD_ERROR_RELATION, diagnostic.format_detailed());
    }
}

fn first_row_field(messages: &[tokio_postgres::SimpleQueryMessage]) -> Option<String> {
    messages.iter().find_map(|message| match message {
        tokio_postgres::SimpleQueryMessage::Row(row) => row.get(0).map(|v| v.to_string()),
        _ => None,
    })
}

/// Scan server notices scoped to the target table: pull the affected-row
/// count from the first integer in any notice mentioning "record", and
/// flag an upload error when a notice names the load-error relation.
fn scan_notices(table_name: &str, notices: &[String]) -> (u64, bool) {
    let mut rows_loaded = 0u64;
    let mut upload_error = false;

    for notice in notices {
        if !notice.contains(table_name) {
            continue;
        }
        if notice.contains(LOAD_ERROR_RELATION) {
            upload_error = true;
        }
        info!("Warehouse: {}", notice);
        if notice.contains("record") {
            if let Some(count) = first_integer(notice) {
                rows_loaded = count;
            }
        }
    }

    (rows_loaded, upload_error)
}

fn first_integer(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AwsConfig;

    fn keys_auth() -> CopyAuth {
        CopyAuth::Keys {
            access_key_id: "AKIA123".to_string(),
            secret_access_key: "secret".to_string(),
        }
    }

    fn loader(gzip: bool, auth: CopyAuth) -> BulkLoader {
        use crate::pool::{PgConnectionManager, Pool};
        use crate::config::WarehouseConfig;
        use std::time::Duration;

        let warehouse = WarehouseConfig {
            host: "localhost".to_string(),
            port: 5439,
            database: "analytics".to_string(),
            user: "etl".to_string(),
            password: "pw".to_string(),
            schema: "public".to_string(),
        };
        BulkLoader {
            pool: Arc::new(Pool::new(
                PgConnectionManager::new(&warehouse, Duration::from_secs(1)),
                0,
                Duration::from_secs(1),
            )),
            table_name: "jobfeed_stage_jobs".to_string(),
            table_ddl: "create table jobfeed_stage_jobs (jobkey VARCHAR(30))".to_string(),
            schema: "public".to_string(),
            artifact: None,
            null_token: "NULL".to_string(),
            max_errors: 10,
            gzip,
            auth,
        }
    }

    #[test]
    fn test_copy_statement_with_keys() {
        let statement = loader(false, keys_auth()).copy_statement(Path::new("/tmp/jobs.tsv"));
        assert_eq!(
            statement,
            "COPY jobfeed_stage_jobs FROM '/tmp/jobs.tsv' \
             ACCESS_KEY_ID 'AKIA123' SECRET_ACCESS_KEY 'secret' \
             DELIMITER '\t' NULL AS 'NULL' ESCAPE IGNOREHEADER 1 MAXERROR 10"
        );
    }

    #[test]
    fn test_copy_statement_with_iam_role_and_gzip() {
        let statement = loader(true, CopyAuth::IamRole("arn:aws:iam::1:role/copy".to_string()))
            .copy_statement(Path::new("/tmp/jobs.tsv.gz"));
        assert!(statement.contains("IAM_ROLE 'arn:aws:iam::1:role/copy'"));
        assert!(!statement.contains("ACCESS_KEY_ID"));
        assert!(statement.ends_with("MAXERROR 10 GZIP"));
    }

    #[test]
    fn test_auth_from_config_prefers_role() {
        let aws = AwsConfig {
            access_key_id: None,
            secret_access_key: None,
            iam_role: Some("arn:aws:iam::1:role/copy".to_string()),
        };
        assert!(matches!(
            CopyAuth::from_config(&aws).unwrap(),
            CopyAuth::IamRole(_)
        ));
    }

    #[test]
    fn test_auth_from_config_requires_something() {
        let aws = AwsConfig::default();
        assert!(matches!(
            CopyAuth::from_config(&aws),
            Err(EtlError::Config(_))
        ));
    }

    #[test]
    fn test_scan_notices_extracts_row_count() {
        let notices = vec![
            "Load into table 'jobfeed_stage_jobs' completed, 125 record(s) loaded successfully."
                .to_string(),
        ];
        let (rows, upload_error) = scan_notices("jobfeed_stage_jobs", &notices);
        assert_eq!(rows, 125);
        assert!(!upload_error);
    }

    #[test]
    fn test_scan_notices_detects_upload_error() {
        let notices = vec![
            "Load into table 'jobfeed_stage_jobs' completed, 5 record(s) loaded successfully."
                .to_string(),
            "Load into table 'jobfeed_stage_jobs' completed, 2 record(s) could not be loaded. \
             Check 'stl_load_errors' system table for details."
                .to_string(),
        ];
        let (rows, upload_error) = scan_notices("jobfeed_stage_jobs", &notices);
        assert!(upload_error);
        // the last "record" notice wins; callers treat the count as
        // best-effort reconciliation
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_scan_notices_ignores_other_tables() {
        let notices = vec![
            "Load into table 'other_table' completed, 99 record(s) loaded. See stl_load_errors."
                .to_string(),
        ];
        let (rows, upload_error) = scan_notices("jobfeed_stage_jobs", &notices);
        assert_eq!(rows, 0);
        assert!(!upload_error);
    }

    #[test]
    fn test_first_integer() {
        assert_eq!(first_integer("loaded 42 records"), Some(42));
        assert_eq!(first_integer("no digits here"), None);
        assert_eq!(first_integer("12 then 34"), Some(12));
    }
}
