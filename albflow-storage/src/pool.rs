//! Connection pool with an explicit FIFO waiter queue.
//!
//! `acquire` hands out an idle connection, creates one while under
//! `max_connections`, or parks the caller at the tail of the queue.
//! `release` gives the connection to the oldest live waiter, bypassing
//! the idle set. A maintenance thread validates idle connections every
//! 60 s and refills to `min_connections`.

use std::collections::VecDeque;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use albflow_core::config::PoolConfig;
use albflow_core::errors::StorageError;
use rusqlite::Connection;
use tracing::{debug, warn};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const MAINTENANCE_POLL: Duration = Duration::from_millis(250);

/// Where pooled connections come from.
#[derive(Debug, Clone)]
enum ConnectionSource {
    File(PathBuf),
    /// Named shared-cache in-memory database; every pooled connection
    /// sees the same data.
    Memory(String),
}

impl ConnectionSource {
    fn open(&self) -> Result<Connection, StorageError> {
        let conn = match self {
            Self::File(path) => Connection::open(path).map_err(StorageError::connection)?,
            Self::Memory(uri) => Connection::open(uri).map_err(StorageError::connection)?,
        };
        configure_connection(&conn)?;
        Ok(conn)
    }
}

/// Per-connection tuning applied on every open.
fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
    // journal_mode and mmap_size report their resulting value as a row.
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
        .map_err(StorageError::connection)?;
    // mmap_size reports its resulting value as a row for file-backed
    // databases, but not for in-memory ones; use pragma_update so it
    // works for both.
    conn.pragma_update(None, "mmap_size", 268_435_456i64)
        .map_err(StorageError::connection)?;
    conn.query_row("PRAGMA busy_timeout=5000", [], |_| Ok(()))
        .map_err(StorageError::connection)?;
    conn.execute_batch(
        "PRAGMA synchronous=NORMAL;
         PRAGMA temp_store=MEMORY;
         PRAGMA cache_size=10000;",
    )
    .map_err(StorageError::connection)?;
    Ok(())
}

enum WaiterSlot {
    Waiting,
    Ready(Connection),
    /// The waiter gave up; a releaser must skip this slot.
    Abandoned,
    Destroyed,
}

struct Waiter {
    slot: Mutex<WaiterSlot>,
    cond: Condvar,
}

struct PoolState {
    available: Vec<Connection>,
    in_use: usize,
    total: usize,
    waiters: VecDeque<Arc<Waiter>>,
}

struct PoolInner {
    source: ConnectionSource,
    config: PoolConfig,
    state: Mutex<PoolState>,
    shutdown: AtomicBool,
    /// Keeps a shared in-memory database alive while the pool drains.
    _anchor: Mutex<Option<Connection>>,
}

/// Shared connection pool. Cloneable via `Arc`; `destroy` is explicit.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Open a pool over a database file.
    pub fn open(path: &Path, config: PoolConfig) -> Result<Self, StorageError> {
        Self::new(ConnectionSource::File(path.to_path_buf()), config, None)
    }

    /// Open a pool over a private shared-cache in-memory database.
    pub fn open_in_memory(config: PoolConfig) -> Result<Self, StorageError> {
        let uri = format!(
            "file:albflow-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let source = ConnectionSource::Memory(uri);
        let anchor = source.open()?;
        Self::new(source, config, Some(anchor))
    }

    fn new(
        source: ConnectionSource,
        mut config: PoolConfig,
        anchor: Option<Connection>,
    ) -> Result<Self, StorageError> {
        config.max_connections = config.max_connections.max(1);
        config.min_connections = config.min_connections.min(config.max_connections);

        let mut available = Vec::new();
        for _ in 0..config.min_connections {
            available.push(source.open()?);
        }
        let total = available.len();

        let inner = Arc::new(PoolInner {
            source,
            config,
            state: Mutex::new(PoolState {
                available,
                in_use: 0,
                total,
                waiters: VecDeque::new(),
            }),
            shutdown: AtomicBool::new(false),
            _anchor: Mutex::new(anchor),
        });

        let maintenance = spawn_maintenance(Arc::clone(&inner));
        Ok(Self {
            inner,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    /// Borrow a connection, waiting up to `acquire_timeout_ms`.
    pub fn acquire(&self) -> Result<PooledConnection, StorageError> {
        let inner = &self.inner;
        if inner.shutdown.load(Ordering::SeqCst) {
            return Err(StorageError::Destroyed);
        }

        let waiter = {
            let mut state = inner.state.lock().map_err(|_| StorageError::Destroyed)?;

            // Idle connection, validated on borrow if configured.
            while let Some(conn) = state.available.pop() {
                if inner.config.test_on_borrow && !validate_connection(&conn) {
                    debug!("discarding invalid pooled connection");
                    state.total -= 1;
                    continue;
                }
                state.in_use += 1;
                return Ok(self.guard(conn));
            }

            // Room to grow.
            if state.total < inner.config.max_connections {
                state.total += 1;
                state.in_use += 1;
                drop(state);
                match inner.source.open() {
                    Ok(conn) => return Ok(self.guard(conn)),
                    Err(e) => {
                        let mut state =
                            inner.state.lock().map_err(|_| StorageError::Destroyed)?;
                        state.total -= 1;
                        state.in_use -= 1;
                        return Err(e);
                    }
                }
            }

            // Park at the tail of the queue.
            let waiter = Arc::new(Waiter {
                slot: Mutex::new(WaiterSlot::Waiting),
                cond: Condvar::new(),
            });
            state.waiters.push_back(Arc::clone(&waiter));
            waiter
        };

        self.wait_for_handoff(waiter)
    }

    fn wait_for_handoff(&self, waiter: Arc<Waiter>) -> Result<PooledConnection, StorageError> {
        let timeout = Duration::from_millis(self.inner.config.acquire_timeout_ms);
        let started = Instant::now();

        let mut slot = waiter
            .slot
            .lock()
            .map_err(|_| StorageError::Destroyed)?;
        loop {
            match std::mem::replace(&mut *slot, WaiterSlot::Waiting) {
                WaiterSlot::Ready(conn) => return Ok(self.guard(conn)),
                WaiterSlot::Destroyed => return Err(StorageError::Destroyed),
                WaiterSlot::Waiting | WaiterSlot::Abandoned => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                // Mark abandoned so a racing release skips this slot.
                // The slot lock must be dropped before touching the pool
                // state: release() locks state then slot.
                *slot = WaiterSlot::Abandoned;
                drop(slot);
                let in_use = self
                    .inner
                    .state
                    .lock()
                    .map(|s| s.in_use)
                    .unwrap_or_default();
                return Err(StorageError::PoolExhausted {
                    in_use,
                    waited_ms: elapsed.as_millis() as u64,
                });
            }

            let (guard, _timed_out) = waiter
                .cond
                .wait_timeout(slot, timeout - elapsed)
                .map_err(|_| StorageError::Destroyed)?;
            slot = guard;
        }
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Idle + busy totals, for diagnostics.
    pub fn size(&self) -> (usize, usize) {
        self.inner
            .state
            .lock()
            .map(|s| (s.available.len(), s.in_use))
            .unwrap_or((0, 0))
    }

    /// Fail all waiters, close every connection, stop maintenance.
    pub fn destroy(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut state) = self.inner.state.lock() {
            while let Some(waiter) = state.waiters.pop_front() {
                if let Ok(mut slot) = waiter.slot.lock() {
                    *slot = WaiterSlot::Destroyed;
                }
                waiter.cond.notify_one();
            }
            state.available.clear();
            state.total = state.in_use;
        }
        if let Ok(mut handle) = self.maintenance.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        debug!("connection pool destroyed");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }
}

fn release(inner: &Arc<PoolInner>, conn: Connection) {
    let Ok(mut state) = inner.state.lock() else {
        return;
    };

    if inner.shutdown.load(Ordering::SeqCst) {
        state.in_use = state.in_use.saturating_sub(1);
        state.total = state.total.saturating_sub(1);
        return;
    }

    // Validate before any handoff, replacing a dead connection.
    let mut conn = conn;
    if inner.config.test_on_borrow && !validate_connection(&conn) {
        match inner.source.open() {
            Ok(fresh) => conn = fresh,
            Err(e) => {
                warn!("failed to replace invalid connection on release: {e}");
                state.in_use -= 1;
                state.total -= 1;
                return;
            }
        }
    }

    // Hand off to the oldest waiter still waiting; accounting is
    // unchanged, the connection stays "in use".
    while let Some(waiter) = state.waiters.pop_front() {
        if let Ok(mut slot) = waiter.slot.lock() {
            if matches!(*slot, WaiterSlot::Waiting) {
                *slot = WaiterSlot::Ready(conn);
                waiter.cond.notify_one();
                return;
            }
        }
        // Abandoned waiter: keep looking.
    }

    state.in_use -= 1;
    state.available.push(conn);
}

fn validate_connection(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
}

fn spawn_maintenance(inner: Arc<PoolInner>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("albflow-pool-maintenance".to_string())
        .spawn(move || {
            let mut last_run = Instant::now();
            loop {
                std::thread::sleep(MAINTENANCE_POLL);
                if inner.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if last_run.elapsed() < MAINTENANCE_INTERVAL {
                    continue;
                }
                last_run = Instant::now();
                run_maintenance(&inner);
            }
        })
        .expect("failed to spawn pool maintenance thread")
}

/// Validate idle connections, drop the invalid, refill to the minimum.
fn run_maintenance(inner: &Arc<PoolInner>) {
    let deficit = {
        let Ok(mut state) = inner.state.lock() else {
            return;
        };
        let before = state.available.len();
        state.available.retain(validate_connection);
        let dropped = before - state.available.len();
        state.total -= dropped;
        if dropped > 0 {
            debug!("pool maintenance dropped {dropped} invalid connection(s)");
        }
        inner.config.min_connections.saturating_sub(state.total)
    };

    for _ in 0..deficit {
        match inner.source.open() {
            Ok(conn) => {
                let Ok(mut state) = inner.state.lock() else {
                    return;
                };
                state.available.push(conn);
                state.total += 1;
            }
            Err(e) => {
                warn!("pool maintenance could not refill connection: {e}");
                return;
            }
        }
    }
}

/// RAII guard; returns the connection to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn.as_ref().map(|_| "Connection"))
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            release(&self.pool, conn);
        }
    }
}
