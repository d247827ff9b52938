//! SQL runner: parameterized scripts on pooled connections, sequential
//! or across a bounded worker pool, plus table maintenance helpers.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_postgres::SimpleQueryMessage;
use tracing::{debug, warn};

use crate::error::{EtlError, Result};
use crate::pool::{PooledConn, WarehousePool};
use crate::template::render_template;

/// Options VACUUM accepts; anything else is a usage error answered with
/// the zero-result sentinel.
const VACUUM_OPTIONS: [&str; 4] = ["full", "sort only", "delete only", "reindex"];

/// Runs SQL statements and scripts against the shared connection pool.
pub struct SqlRunner {
    pool: Arc<WarehousePool>,
    workers: usize,
    schema: String,
}

impl SqlRunner {
    pub fn new(pool: Arc<WarehousePool>, workers: usize, schema: impl Into<String>) -> Self {
        Self {
            pool,
            workers,
            schema: schema.into(),
        }
    }

    /// Execute one statement, returning the affected-row count.
    ///
    /// Parameters are substituted textually via [`render_template`]
    /// before execution — usable for table/column slots, and therefore
    /// never safe for untrusted input.
    pub async fn exec(&self, sql: &str, params: Option<&HashMap<String, String>>) -> Result<u64> {
        let conn = self.pool.acquire().await?;
        let result = exec_on(&conn, sql, params, "inline statement").await;
        self.pool.release(conn).await;
        result
    }

    /// Execute a single SQL script file inside a transaction.
    ///
    /// Without `commit` the transaction is left open; the pool's health
    /// check then discards the connection and the server rolls the work
    /// back — a dry-run, matching the explicit-commit contract.
    pub async fn exec_script(
        &self,
        path: &Path,
        params: Option<&HashMap<String, String>>,
        commit: bool,
    ) -> Result<u64> {
        run_script(&self.pool, path, params, commit).await
    }

    /// Execute multiple scripts one by one on a single connection, in
    /// input order, with one commit at the end when requested.
    pub async fn exec_scripts(&self, paths: &[PathBuf], commit: bool) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = scripts_in_txn(&mut conn, paths, commit).await;
        self.pool.release(conn).await;
        result
    }

    /// Execute scripts across the bounded worker pool, each on its own
    /// borrowed connection with its own commit. Execution order is
    /// unspecified; the returned results correspond 1:1 to the input
    /// order.
    pub async fn exec_scripts_parallel(&self, paths: &[PathBuf]) -> Vec<Result<u64>> {
        let futures = paths
            .iter()
            .map(|path| {
                let pool = self.pool.clone();
                let path = path.clone();
                async move { run_script(&pool, &path, None, true).await }
            })
            .collect();
        dispatch_ordered(self.workers, futures).await
    }

    /// Whether a table exists in the given schema.
    pub async fn table_exists(&self, table: &str, schema: &str) -> Result<bool> {
        let conn = self.pool.acquire().await?;
        let result = async {
            let sql = r#"
                SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )
            "#;
            let row = conn.client().query_one(sql, &[&schema, &table]).await?;
            Ok(row.get::<_, bool>(0))
        }
        .await;
        self.pool.release(conn).await;
        result
    }

    /// List the tables in a schema, sorted by name.
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let conn = self.pool.acquire().await?;
        let result = async {
            let sql = r#"
                SELECT table_name FROM information_schema.tables
                WHERE table_schema = $1
                ORDER BY table_name
            "#;
            let rows = conn.client().query(sql, &[&schema]).await?;
            Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
        }
        .await;
        self.pool.release(conn).await;
        result
    }

    /// ANALYZE one table, qualifying a bare name with the runner schema.
    pub async fn analyze_table(&self, table: &str) -> Result<u64> {
        self.exec(&format!("ANALYZE {}", qualify(table, &self.schema)), None)
            .await
    }

    /// ANALYZE multiple tables sequentially on one connection.
    pub async fn analyze_tables(&self, tables: &[String]) -> Result<u64> {
        let conn = self.pool.acquire().await?;
        let result = async {
            let mut affected = 0u64;
            for table in tables {
                let qualified = qualify(table, &self.schema);
                affected += exec_on(
                    &conn,
                    &format!("ANALYZE {}", qualified),
                    None,
                    &format!("ANALYZE {}", qualified),
                )
                .await?;
            }
            Ok(affected)
        }
        .await;
        self.pool.release(conn).await;
        result
    }

    /// ANALYZE tables across the worker pool; results preserve input
    /// order.
    pub async fn analyze_tables_parallel(&self, tables: &[String]) -> Vec<Result<u64>> {
        let futures = tables
            .iter()
            .map(|table| {
                let pool = self.pool.clone();
                let qualified = qualify(table, &self.schema);
                async move {
                    let conn = pool.acquire().await?;
                    let result = exec_on(
                        &conn,
                        &format!("ANALYZE {}", qualified),
                        None,
                        &format!("ANALYZE {}", qualified),
                    )
                    .await;
                    pool.release(conn).await;
                    result
                }
            })
            .collect();
        dispatch_ordered(self.workers, futures).await
    }

    /// TRUNCATE one table.
    pub async fn truncate_table(&self, table: &str) -> Result<u64> {
        self.exec(
            &format!("TRUNCATE TABLE {}", qualify(table, &self.schema)),
            None,
        )
        .await
    }

    /// TRUNCATE multiple tables sequentially.
    pub async fn truncate_tables(&self, tables: &[String]) -> Result<u64> {
        let mut affected = 0u64;
        for table in tables {
            affected += self.truncate_table(table).await?;
        }
        Ok(affected)
    }

    /// VACUUM the database, or one table, with an optional option clause.
    ///
    /// An unrecognized option is a usage error answered with the
    /// zero-result sentinel rather than an error.
    pub async fn vacuum(&self, table: Option<&str>, option: Option<&str>) -> Result<u64> {
        match vacuum_statement(table, option, &self.schema) {
            Some(sql) => self.exec(&sql, None).await,
            None => Ok(0),
        }
    }
}

/// Build the VACUUM statement, or `None` for an unrecognized option.
fn vacuum_statement(table: Option<&str>, option: Option<&str>, schema: &str) -> Option<String> {
    let mut sql = String::from("VACUUM");
    if let Some(option) = option {
        if !VACUUM_OPTIONS.contains(&option.to_lowercase().as_str()) {
            warn!("Unrecognized vacuum option '{}'; nothing to do", option);
            return None;
        }
        sql.push(' ');
        sql.push_str(&option.to_uppercase());
    }
    if let Some(table) = table {
        sql.push(' ');
        sql.push_str(&qualify(table, schema));
    }
    Some(sql)
}

/// Qualify a bare table name with a schema; names already qualified are
/// passed through.
fn qualify(table: &str, schema: &str) -> String {
    if table.contains('.') {
        table.to_string()
    } else {
        format!("\"{}\".\"{}\"", schema, table)
    }
}

/// Render (when parameterized) and run one statement over the simple
/// query protocol, summing the affected-row counts of every completed
/// command.
async fn exec_on(
    conn: &PooledConn,
    sql: &str,
    params: Option<&HashMap<String, String>>,
    description: &str,
) -> Result<u64> {
    let sql = match params {
        Some(params) => render_template(sql, params)?,
        None => sql.to_string(),
    };

    let start = Instant::now();
    let messages = conn.client().simple_query(&sql).await?;
    let affected: u64 = messages
        .iter()
        .map(|message| match message {
            SimpleQueryMessage::CommandComplete(count) => *count,
            _ => 0,
        })
        .sum();

    debug!(
        "Query: {} Finished in: {:.2}s Affected rows: {}",
        description,
        start.elapsed().as_secs_f64(),
        affected
    );
    Ok(affected)
}

/// Read a script file and run it in a transaction on a pooled
/// connection.
async fn run_script(
    pool: &WarehousePool,
    path: &Path,
    params: Option<&HashMap<String, String>>,
    commit: bool,
) -> Result<u64> {
    let sql = std::fs::read_to_string(path)?;
    let mut conn = pool.acquire().await?;
    let result = async {
        conn.begin().await?;
        let affected = exec_on(&conn, &sql, params, &path.display().to_string()).await?;
        if commit {
            conn.commit().await?;
        }
        Ok(affected)
    }
    .await;
    pool.release(conn).await;
    result
}

async fn scripts_in_txn(conn: &mut PooledConn, paths: &[PathBuf], commit: bool) -> Result<u64> {
    conn.begin().await?;
    let mut affected = 0u64;
    for path in paths {
        let sql = std::fs::read_to_string(path)?;
        affected += exec_on(conn, &sql, None, &path.display().to_string()).await?;
    }
    if commit {
        conn.commit().await?;
    }
    Ok(affected)
}

/// Run futures across a bounded worker pool, collecting results in input
/// order regardless of completion order.
pub(crate) async fn dispatch_ordered<T, F>(workers: usize, futures: Vec<F>) -> Vec<Result<T>>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(futures.len());

    for future in futures {
        // the semaphore is never closed
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            future.await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => Err(EtlError::Task(format!("worker task failed: {}", e))),
        });
    }
    results
}
