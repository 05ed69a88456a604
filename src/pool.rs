//! Connection pool
//!
//! A fixed set of persistent `may_postgres` clients, one per slot. Idle clients
//! sit in a bounded `crossbeam-channel`; `acquire()` takes one out and the
//! returned guard puts it back when dropped. Waiting for a slot never exceeds
//! the configured `pool_timeout_seconds`.

use crate::config::DatabaseConfig;
use crate::connection::{check_connection_health, connect, ConnectionError};
use crate::executor::{instrumented, Executor, StoreError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Pool of persistent PostgreSQL connections
pub struct ConnectionPool {
    url: String,
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
    size: usize,
    timeout: Duration,
}

impl ConnectionPool {
    /// Open `max_connections` connections up front
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the pool size is not positive or any connection fails.
    pub fn new(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let size = usize::try_from(config.max_connections)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConnectionError::Pool(format!(
                    "max_connections must be positive, got {}",
                    config.max_connections
                ))
            })?;

        let (idle_tx, idle_rx) = bounded(size);
        for _ in 0..size {
            let client = connect(&config.url)?;
            idle_tx
                .send(client)
                .map_err(|e| ConnectionError::Pool(format!("failed to park connection: {e}")))?;
        }

        log::info!("connection pool ready with {size} connection(s)");

        Ok(Self {
            url: config.url.clone(),
            idle_tx,
            idle_rx,
            size,
            timeout: Duration::from_secs(config.pool_timeout_seconds),
        })
    }

    /// Number of connection slots
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of connections currently idle
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    /// Take a connection out of the pool, waiting at most the configured timeout
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Pool` if no connection becomes available in time.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_connection_span().entered();

        let start = Instant::now();
        let client = self.idle_rx.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => StoreError::Pool(format!(
                "no connection available after {}s ({} slot(s) in use)",
                self.timeout.as_secs(),
                self.size
            )),
            RecvTimeoutError::Disconnected => StoreError::Pool("pool has been shut down".to_string()),
        })?;

        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_connection_wait(start.elapsed());
        #[cfg(not(feature = "metrics"))]
        let _ = start;

        Ok(PooledConnection {
            client: Some(client),
            pool: self,
        })
    }

    /// Acquire a connection and run `SELECT 1` on it
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if no connection is available or the query fails.
    pub fn check_health(&self) -> Result<bool, StoreError> {
        let conn = self.acquire()?;
        conn.check_health()
    }

    fn release(&self, client: Client) {
        if self.idle_tx.try_send(client).is_err() {
            log::warn!("connection returned to a full pool; dropping it");
        }
    }

    fn reopen(&self) {
        match connect(&self.url) {
            Ok(client) => self.release(client),
            Err(e) => log::error!("failed to replace broken connection: {e}"),
        }
    }
}

/// A connection borrowed from a [`ConnectionPool`]
///
/// Goes back to the pool when dropped, unless it was discarded as broken.
pub struct PooledConnection<'a> {
    client: Option<Client>,
    pool: &'a ConnectionPool,
}

impl PooledConnection<'_> {
    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        match self.client.as_ref() {
            Some(client) => client,
            None => unreachable!("pooled connection used after release"),
        }
    }

    /// Check the connection with `SELECT 1`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the health query cannot be executed.
    pub fn check_health(&self) -> Result<bool, StoreError> {
        check_connection_health(self.client()).map_err(|e| StoreError::Other(format!("Health check error: {e}")))
    }

    /// Drop this connection instead of returning it, and open a replacement slot
    pub fn discard(mut self) {
        self.client.take();
        log::warn!("discarding pooled connection");
        self.pool.reopen();
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
        }
    }
}

impl Executor for PooledConnection<'_> {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        instrumented(query, || self.client().execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        instrumented(query, || self.client().query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        instrumented(query, || self.client().query(query, params))
    }
}
