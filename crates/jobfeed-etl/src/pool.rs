//! Pooled warehouse connections with bounded retry and health-checked
//! return-to-pool.
//!
//! The pool is an explicit value constructed once by the orchestrator and
//! injected (`Arc<WarehousePool>`) into every component that needs a
//! connection. The free list is the only state shared across workers.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::{debug, info, warn};

use crate::config::{Config, WarehouseConfig};
use crate::error::{EtlError, Result};

/// Dials and health-checks connections on behalf of a [`Pool`].
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Establish one fresh connection.
    async fn connect(&self) -> Result<Self::Conn>;

    /// Whether a returned connection may go back on the free list.
    fn reusable(&self, conn: &Self::Conn) -> bool;

    /// Human-readable endpoint description for error context.
    fn context(&self) -> String;
}

/// A pool of reusable connections.
///
/// `acquire` pops the free list when possible and otherwise dials fresh,
/// retrying up to `retries` times with a progressively increasing delay
/// (`base_delay * attempts_consumed`). A budget of R retries survives R
/// consecutive dial failures; the R+1-th failure is returned as a typed
/// connection error — the pool never exits the process.
pub struct Pool<M: ConnectionManager> {
    manager: M,
    free: Mutex<Vec<M::Conn>>,
    retries: u32,
    base_delay: Duration,
}

impl<M: ConnectionManager> Pool<M> {
    pub fn new(manager: M, retries: u32, base_delay: Duration) -> Self {
        Self {
            manager,
            free: Mutex::new(Vec::new()),
            retries,
            base_delay,
        }
    }

    /// Borrow a connection, dialing a new one if the free list is empty.
    pub async fn acquire(&self) -> Result<M::Conn> {
        if let Some(conn) = self.free.lock().await.pop() {
            return Ok(conn);
        }
        self.dial().await
    }

    /// Return a borrowed connection. Unhealthy connections (closed, or
    /// not transaction-idle) are dropped, never pooled.
    pub async fn release(&self, conn: M::Conn) {
        if self.manager.reusable(&conn) {
            self.free.lock().await.push(conn);
        } else {
            debug!("discarding unhealthy connection instead of pooling it");
        }
    }

    async fn dial(&self) -> Result<M::Conn> {
        let attempts = self.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.manager.connect().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt == attempts {
                        break;
                    }
                    let delay = self.base_delay * attempt;
                    warn!(
                        "Connection attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, attempts, last_error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(EtlError::connection(
            format!(
                "could not connect after {} attempts: {}",
                attempts, last_error
            ),
            self.manager.context(),
        ))
    }
}

/// Transaction state the pool's health check inspects on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Idle,
    InTransaction,
}

/// A live warehouse session with captured server notices and tracked
/// transaction state.
///
/// Server notices (the channel COPY load diagnostics arrive on) are
/// pumped into an internal queue by the connection driver task and read
/// back with [`PooledConn::drain_notices`].
pub struct PooledConn {
    client: Client,
    notices: mpsc::UnboundedReceiver<String>,
    txn: TxnStatus,
}

impl PooledConn {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub fn txn_status(&self) -> TxnStatus {
        self.txn
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        self.txn = TxnStatus::InTransaction;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        self.txn = TxnStatus::Idle;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        self.txn = TxnStatus::Idle;
        Ok(())
    }

    /// Take every server notice received so far, oldest first.
    pub fn drain_notices(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = self.notices.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// Dials warehouse sessions for the pool.
pub struct PgConnectionManager {
    pg_config: tokio_postgres::Config,
    endpoint: String,
}

impl PgConnectionManager {
    pub fn new(config: &WarehouseConfig, connect_timeout: Duration) -> Self {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.connect_timeout(connect_timeout);
        pg_config.keepalives(true);

        Self {
            pg_config,
            endpoint: format!("{}:{}/{}", config.host, config.port, config.database),
        }
    }
}

#[async_trait]
impl ConnectionManager for PgConnectionManager {
    type Conn = PooledConn;

    async fn connect(&self) -> Result<PooledConn> {
        let (client, mut connection) = self.pg_config.connect(NoTls).await?;

        // Drive the connection and capture async notices. The task ends
        // when the client is dropped or the server closes the session.
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match std::future::poll_fn(|cx| connection.poll_message(cx)).await {
                    Some(Ok(AsyncMessage::Notice(notice))) => {
                        let _ = tx.send(notice.message().to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("warehouse connection terminated: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        });

        info!("Connected to warehouse: {}", self.endpoint);
        Ok(PooledConn {
            client,
            notices: rx,
            txn: TxnStatus::Idle,
        })
    }

    fn reusable(&self, conn: &PooledConn) -> bool {
        !conn.is_closed() && conn.txn_status() == TxnStatus::Idle
    }

    fn context(&self) -> String {
        format!("connecting to warehouse {}", self.endpoint)
    }
}

/// The pool type every component borrows from.
pub type WarehousePool = Pool<PgConnectionManager>;

/// Build the warehouse pool from configuration.
pub fn warehouse_pool(config: &Config) -> WarehousePool {
    Pool::new(
        PgConnectionManager::new(&config.warehouse, Duration::from_secs(config.etl.timeout_secs)),
        config.etl.retries,
        Duration::from_secs(config.etl.timeout_secs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug)]
    struct FakeConn {
        id: usize,
        healthy: bool,
    }

    struct FakeManager {
        /// Dial attempts that fail before connects start succeeding.
        failures: AtomicU32,
        dialed: AtomicUsize,
    }

    impl FakeManager {
        fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                dialed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConnectionManager for FakeManager {
        type Conn = FakeConn;

        async fn connect(&self) -> Result<FakeConn> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(EtlError::Config("dial refused".into()));
            }
            let id = self.dialed.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn { id, healthy: true })
        }

        fn reusable(&self, conn: &FakeConn) -> bool {
            conn.healthy
        }

        fn context(&self) -> String {
            "connecting to fake warehouse".to_string()
        }
    }

    const BASE: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_acquire_survives_retry_budget_failures() {
        // retries = 2 survives exactly 2 consecutive dial failures
        let pool = Pool::new(FakeManager::failing(2), 2, BASE);
        let start = Instant::now();
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, 0);
        // progressive backoff: base*1 after the first failure, base*2 after
        // the second
        assert_eq!(start.elapsed(), BASE * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_fails_past_retry_budget() {
        let pool = Pool::new(FakeManager::failing(3), 2, BASE);
        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, EtlError::Connection { .. }));
        // no sleep after the final failed attempt
        assert_eq!(start.elapsed(), BASE * 3);
    }

    #[tokio::test]
    async fn test_released_healthy_connection_is_reused() {
        let pool = Pool::new(FakeManager::failing(0), 0, BASE);
        let conn = pool.acquire().await.unwrap();
        let id = conn.id;
        pool.release(conn).await;
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, id);
    }

    #[tokio::test]
    async fn test_released_unhealthy_connection_is_discarded() {
        let pool = Pool::new(FakeManager::failing(0), 0, BASE);
        let mut conn = pool.acquire().await.unwrap();
        let unhealthy_id = conn.id;
        conn.healthy = false;
        pool.release(conn).await;
        // the next acquire must dial fresh, never hand back the bad one
        let conn = pool.acquire().await.unwrap();
        assert_ne!(conn.id, unhealthy_id);
        assert!(conn.healthy);
    }

    #[tokio::test]
    async fn test_concurrent_borrow_and_return() {
        use std::sync::Arc;

        let pool = Arc::new(Pool::new(FakeManager::failing(0), 0, BASE));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                tokio::task::yield_now().await;
                pool.release(conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // every borrowed connection came back healthy
        assert!(!pool.free.lock().await.is_empty());
    }
}
