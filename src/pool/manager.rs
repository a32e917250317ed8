//! Bounded connection pool.
//!
//! Idle connections wait in a bounded `crossbeam-channel` queue sized to the
//! pool limit. A caller that finds no idle connection and no free slot backs
//! off with `may::coroutine::sleep`, so waiting parks the coroutine instead
//! of pinning a worker thread. The pool is constructed and owned by the
//! caller; the query layer only leases from it.

use crate::connection::PgConnector;
use crate::executor::{ConnectionSource, Executor, StorageError};
use crate::pool::config::DatabaseConfig;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

const ACQUIRE_BACKOFF: Duration = Duration::from_millis(2);

/// Opens new connections for a [`Pool`].
pub trait Connector: Send + Sync {
    type Connection: Executor + Send;

    fn connect(&self) -> Result<Self::Connection, StorageError>;

    /// Checked before an idle connection is handed out again.
    fn is_healthy(&self, _conn: &Self::Connection) -> bool {
        true
    }
}

pub struct Pool<C: Connector> {
    connector: C,
    idle_tx: Sender<C::Connection>,
    idle_rx: Receiver<C::Connection>,
    open: AtomicUsize,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl Pool<PgConnector> {
    /// Build a PostgreSQL pool from configuration. Connections open lazily.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let connector = PgConnector::new(config.url.clone())?;
        Ok(Pool::new(connector, config.max_connections, config.acquire_timeout()))
    }
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, max_connections: usize, acquire_timeout: Duration) -> Self {
        let max_connections = max_connections.max(1);
        let (idle_tx, idle_rx) = bounded(max_connections);
        Self {
            connector,
            idle_tx,
            idle_rx,
            open: AtomicUsize::new(0),
            max_connections,
            acquire_timeout,
        }
    }

    /// Connections currently open, leased or idle.
    pub fn size(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn reserve_slot(&self) -> bool {
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .is_ok()
    }

    fn free_slot(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }

    fn take_idle(&self) -> Option<C::Connection> {
        loop {
            match self.idle_rx.try_recv() {
                Ok(conn) if self.connector.is_healthy(&conn) => return Some(conn),
                Ok(_) => {
                    log::warn!("discarding unhealthy pooled connection");
                    self.free_slot();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

impl<C: Connector> ConnectionSource for Pool<C> {
    type Connection = C::Connection;

    fn acquire(&self) -> Result<C::Connection, StorageError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_connection_span().entered();

        let start = Instant::now();
        let conn = loop {
            if let Some(conn) = self.take_idle() {
                break conn;
            }
            if self.reserve_slot() {
                match self.connector.connect() {
                    Ok(conn) => break conn,
                    Err(e) => {
                        self.free_slot();
                        return Err(e);
                    }
                }
            }
            if start.elapsed() >= self.acquire_timeout {
                return Err(StorageError::new(format!(
                    "timed out after {:?} waiting for a connection ({} open)",
                    self.acquire_timeout,
                    self.size()
                )));
            }
            may::coroutine::sleep(ACQUIRE_BACKOFF);
        };

        #[cfg(feature = "metrics")]
        METRICS.record_connection_wait(start.elapsed());
        Ok(conn)
    }

    fn release(&self, conn: C::Connection) {
        if self.idle_tx.try_send(conn).is_err() {
            self.free_slot();
        }
    }
}
