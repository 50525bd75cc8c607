// Copyright 2020 Joyent, Inc.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use derive_more::{
    Add, AddAssign, Display, From, Into, Sub, SubAssign,
};
use slog::{debug, info, o, warn, Drain, Logger};

use crate::connection::Connection;
use crate::endpoint::{Endpoint, EndpointKey};
use crate::error::Error;

/// The default cap on live connections per endpoint for `BasicPool`.
pub const DEFAULT_MAX_CONNECTIONS_PER_ENDPOINT: u32 = 4;

/// A newtype wrapper around u32 used for counts of connections maintained by
/// the pool.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct ConnectionCount(u32);

/// The connection counts for a pool.
#[derive(Copy, Clone, Debug)]
pub struct PoolStats {
    /// The total number of live connections, claimed or idle.
    pub total_connections: ConnectionCount,
    /// The count of idle connections in the pool.
    pub idle_connections: ConnectionCount,
}

impl PoolStats {
    /// Create a new instance of `PoolStats` with zeroed counts.
    pub fn new() -> Self {
        PoolStats {
            total_connections: ConnectionCount::from(0),
            idle_connections: ConnectionCount::from(0),
        }
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The keyed connection pool capability the driver consumes.
///
/// The driver holds every connection it claims on exactly one of two exit
/// paths: `release` after the operation succeeded, or `invalidate` after any
/// failure. Implementations decide everything else about connection
/// lifecycle (validation, growth limits, eviction) internally.
pub trait ConnectionPool: Send + Sync {
    /// The connection type managed by the pool.
    type Conn: Connection;

    /// Block up to `timeout_ms` milliseconds waiting for a usable connection
    /// to `endpoint`. `None` blocks indefinitely. Fails with
    /// `Error::ClaimTimeout` if no connection becomes available in time.
    fn acquire(
        &self,
        endpoint: &Endpoint,
        timeout_ms: Option<u64>,
    ) -> Result<Self::Conn, Error>;

    /// Return a healthy connection to the pool for reuse. Callers treat a
    /// failure of this step as non-fatal since the work on the connection
    /// already completed.
    fn release(
        &self,
        endpoint: &Endpoint,
        conn: Self::Conn,
    ) -> Result<(), Error>;

    /// Discard a connection believed to be broken.
    fn invalidate(&self, endpoint: &Endpoint, conn: Self::Conn);

    /// Close every pooled connection across all endpoints.
    fn close(&self);
}

/// The configuration options for a `BasicPool`.
#[derive(Debug, Default)]
pub struct PoolOptions {
    /// An optional cap on the number of live connections per endpoint. If
    /// not specified the default is 4.
    pub max_connections_per_endpoint: Option<u32>,
    /// An optional `slog` logger instance. If none is provided then the
    /// logging will fall back to using the
    /// [`slog-stdlog`](https://docs.rs/slog-stdlog) drain which is
    /// essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

// The internal data structures used to manage the pool: per-endpoint idle
// queues plus per-endpoint live-connection counts.
#[derive(Debug)]
struct PoolData<C> {
    idle: HashMap<EndpointKey, VecDeque<C>>,
    counts: HashMap<EndpointKey, ConnectionCount>,
    stats: PoolStats,
}

impl<C> PoolData<C> {
    fn new() -> Self {
        PoolData {
            idle: HashMap::new(),
            counts: HashMap::new(),
            stats: PoolStats::new(),
        }
    }

    fn count(&self, key: &EndpointKey) -> ConnectionCount {
        self.counts
            .get(key)
            .copied()
            .unwrap_or_else(|| ConnectionCount::from(0))
    }
}

// Protected access to the internal pool data structures.
#[derive(Debug)]
struct ProtectedData<C>(Arc<(Mutex<PoolData<C>>, Condvar)>);

impl<C> ProtectedData<C> {
    fn new(data: PoolData<C>) -> Self {
        ProtectedData(Arc::new((Mutex::new(data), Condvar::new())))
    }

    fn lock(&self) -> MutexGuard<PoolData<C>> {
        (self.0).0.lock().unwrap()
    }

    fn condvar_wait<'a>(
        &self,
        g: MutexGuard<'a, PoolData<C>>,
        m_timeout: Option<Duration>,
    ) -> (MutexGuard<'a, PoolData<C>>, bool) {
        match m_timeout {
            Some(timeout) => {
                let wait_result =
                    (self.0).1.wait_timeout(g, timeout).unwrap();
                (wait_result.0, wait_result.1.timed_out())
            }
            None => ((self.0).1.wait(g).unwrap(), false),
        }
    }

    fn condvar_notify(&self) {
        // Waiters are parked per endpoint but share this condvar, so a
        // wakeup must reach every claimant; a single wakeup could land on a
        // claimant for a different endpoint, which would re-wait and strand
        // the claimant the freed connection was meant for.
        (self.0).1.notify_all()
    }
}

/// The default `ConnectionPool` implementation: lazily established
/// connections held in per-endpoint idle queues, with a cap on live
/// connections per endpoint.
///
/// New connections are produced by the caller-supplied factory function and
/// established via [`Connection::connect`](../connection/trait.Connection.html)
/// before they are handed to a claimant. When an endpoint is at its cap and
/// has no idle connection, `acquire` blocks on a condition variable until a
/// connection is released or invalidated, or the claim deadline passes.
pub struct BasicPool<C, F>
where
    C: Connection,
    F: Fn(&Endpoint) -> C + Send + Sync,
{
    protected_data: ProtectedData<C>,
    create_connection: F,
    max_per_endpoint: ConnectionCount,
    log: Logger,
}

impl<C, F> BasicPool<C, F>
where
    C: Connection,
    F: Fn(&Endpoint) -> C + Send + Sync,
{
    /// Return a new instance of `BasicPool` using `create_connection` to
    /// produce connection instances for an endpoint.
    pub fn new(options: PoolOptions, create_connection: F) -> Self {
        let log = options
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        let max_per_endpoint = ConnectionCount::from(
            options
                .max_connections_per_endpoint
                .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_ENDPOINT),
        );

        BasicPool {
            protected_data: ProtectedData::new(PoolData::new()),
            create_connection,
            max_per_endpoint,
            log,
        }
    }

    /// The current connection counts of the pool.
    pub fn stats(&self) -> PoolStats {
        self.protected_data.lock().stats
    }

    fn establish(&self, endpoint: &Endpoint) -> Result<C, Error> {
        let mut conn = (self.create_connection)(endpoint);
        match conn.connect() {
            Ok(()) => {
                info!(
                    self.log,
                    "established connection for endpoint {}", endpoint
                );
                Ok(conn)
            }
            Err(err) => Err(Error::ConnectFailed {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

impl<C, F> ConnectionPool for BasicPool<C, F>
where
    C: Connection,
    F: Fn(&Endpoint) -> C + Send + Sync,
{
    type Conn = C;

    fn acquire(
        &self,
        endpoint: &Endpoint,
        timeout_ms: Option<u64>,
    ) -> Result<C, Error> {
        let key = endpoint.key();
        let deadline =
            timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut data = self.protected_data.lock();

        loop {
            if let Some(conn) =
                data.idle.get_mut(&key).and_then(|q| q.pop_front())
            {
                data.stats.idle_connections -= 1.into();
                debug!(
                    self.log,
                    "claimed idle connection for endpoint {}", endpoint
                );
                return Ok(conn);
            }

            let count = data.count(&key);
            if count < self.max_per_endpoint {
                // Reserve a slot before dropping the lock so concurrent
                // claimants cannot exceed the cap while we connect.
                data.counts.insert(key.clone(), count + 1.into());
                data.stats.total_connections += 1.into();
                drop(data);

                match self.establish(endpoint) {
                    Ok(conn) => return Ok(conn),
                    Err(err) => {
                        let mut data = self.protected_data.lock();
                        let count = data.count(&key);
                        if count > ConnectionCount::from(0) {
                            data.counts.insert(key.clone(), count - 1.into());
                            data.stats.total_connections -= 1.into();
                        }
                        drop(data);
                        self.protected_data.condvar_notify();
                        return Err(err);
                    }
                }
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::ClaimTimeout(endpoint.clone()));
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let wait_result =
                self.protected_data.condvar_wait(data, remaining);
            data = wait_result.0;
            if wait_result.1 {
                return Err(Error::ClaimTimeout(endpoint.clone()));
            }
        }
    }

    fn release(&self, endpoint: &Endpoint, conn: C) -> Result<(), Error> {
        let key = endpoint.key();
        let mut data = self.protected_data.lock();
        data.idle
            .entry(key)
            .or_insert_with(VecDeque::new)
            .push_back(conn);
        data.stats.idle_connections += 1.into();
        drop(data);
        self.protected_data.condvar_notify();
        Ok(())
    }

    fn invalidate(&self, endpoint: &Endpoint, mut conn: C) {
        if let Err(err) = conn.close() {
            warn!(
                self.log,
                "failed to close invalidated connection for endpoint {}: {}",
                endpoint,
                err
            );
        }

        let key = endpoint.key();
        let mut data = self.protected_data.lock();
        let count = data.count(&key);
        if count > ConnectionCount::from(0) {
            data.counts.insert(key, count - 1.into());
            data.stats.total_connections -= 1.into();
        }
        drop(data);
        // A slot opened up for any claimant blocked on the cap.
        self.protected_data.condvar_notify();

        debug!(
            self.log,
            "invalidated connection for endpoint {}", endpoint
        );
    }

    fn close(&self) {
        let mut data = self.protected_data.lock();
        let drained: Vec<(EndpointKey, VecDeque<C>)> =
            data.idle.drain().collect();

        for (key, queue) in &drained {
            let count = ConnectionCount::from(queue.len() as u32);
            data.stats.idle_connections -= count;
            data.stats.total_connections -= count;
            let live = data.count(key);
            let remaining = if live > count {
                live - count
            } else {
                ConnectionCount::from(0)
            };
            data.counts.insert(key.clone(), remaining);
        }
        drop(data);
        // Draining frees cap slots, so blocked claimants must re-check.
        self.protected_data.condvar_notify();

        for (_key, queue) in drained {
            for mut conn in queue {
                if let Err(err) = conn.close() {
                    warn!(
                        self.log,
                        "failed to close pooled connection: {}", err
                    );
                }
            }
        }

        debug!(self.log, "closed all idle connections");
    }
}
