// Copyright 2020 Joyent, Inc.

use std::collections::HashSet;

use slog::{o, warn, Drain, Logger};

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{AttemptError, Error};
use crate::pool::{BasicPool, ConnectionPool, PoolOptions};
use crate::retry::{
    BackoffStrategy, LimitedRetry, RetryPolicy, DEFAULT_RETRY_LIMIT,
};
use crate::routing::{RandomRouter, Router};

/// The configuration options for constructing a `Driver` with the default
/// pool, routing, and retry implementations.
#[derive(Debug, Default)]
pub struct DriverOptions {
    /// The initially configured endpoints.
    pub endpoints: Vec<Endpoint>,
    /// An optional cap on live connections per endpoint. If not specified
    /// the default is 4.
    pub max_connections_per_endpoint: Option<u32>,
    /// An optional limit on the total number of selection passes made by
    /// `send` and `send_to`. If not specified the default is 10.
    pub retry_limit: Option<u32>,
    /// An optional delay schedule between whole-call retries. If not
    /// specified retries run back to back.
    pub backoff: Option<BackoffStrategy>,
    /// An optional `slog` logger instance. If none is provided then the
    /// logging will fall back to using the
    /// [`slog-stdlog`](https://docs.rs/slog-stdlog) drain which is
    /// essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

/// The driver context: an immutable bundle of connection pool, routing
/// policy, and retry policy created once and shared by all callers. The
/// constituent parts are themselves stateful and thread-safe; the bundle is
/// never mutated after construction.
pub struct Driver<P, R, T>
where
    P: ConnectionPool,
    R: Router,
    T: RetryPolicy,
{
    pool: P,
    router: R,
    retry: T,
    log: Logger,
}

/// The `Driver` type produced by `Driver::new`: the default pool, routing,
/// and retry stack.
pub type DefaultDriver<C, F> =
    Driver<BasicPool<C, F>, RandomRouter, LimitedRetry>;

impl<C, F> DefaultDriver<C, F>
where
    C: Connection,
    F: Fn(&Endpoint) -> C + Send + Sync,
{
    /// Construct a driver with the default stack: a `BasicPool` fed by
    /// `create_connection`, uniform-random routing with blacklist-on-error,
    /// and a bounded retry policy.
    pub fn new(options: DriverOptions, create_connection: F) -> Self {
        let log = options
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        let pool_options = PoolOptions {
            max_connections_per_endpoint: options.max_connections_per_endpoint,
            log: Some(log.clone()),
        };
        let pool = BasicPool::new(pool_options, create_connection);
        let router = RandomRouter::new(options.endpoints);
        let limit = options.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT);
        let retry = match options.backoff {
            Some(backoff) => LimitedRetry::with_backoff(limit, backoff),
            None => LimitedRetry::new(limit),
        };

        Driver {
            pool,
            router,
            retry,
            log,
        }
    }

    /// The current connection counts of the underlying pool.
    pub fn pool_stats(&self) -> crate::pool::PoolStats {
        self.pool.stats()
    }
}

impl<P, R, T> Driver<P, R, T>
where
    P: ConnectionPool,
    R: Router,
    T: RetryPolicy,
{
    /// Construct a driver from explicit pool, routing, and retry
    /// implementations.
    pub fn with_parts(pool: P, router: R, retry: T, log: Option<Logger>) -> Self {
        let log = log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        Driver {
            pool,
            router,
            retry,
            log,
        }
    }

    /// Run `operation` on a connection to a policy-selected endpoint,
    /// re-running the whole selection pass according to the retry policy
    /// when it fails. This is the public entry point for routed sends.
    pub fn send<F, V>(
        &self,
        mut operation: F,
        timeout_ms: Option<u64>,
    ) -> Result<V, Error>
    where
        F: FnMut(&mut P::Conn) -> Result<V, Error>,
    {
        self.retry
            .with_retry(|| self.send_once(None, &mut operation, timeout_ms))
    }

    /// Like `send`, but every attempt runs against `endpoint` instead of
    /// consulting the routing policy. Failed attempts still blacklist the
    /// endpoint and still count against the attempt bound.
    pub fn send_to<F, V>(
        &self,
        endpoint: &Endpoint,
        mut operation: F,
        timeout_ms: Option<u64>,
    ) -> Result<V, Error>
    where
        F: FnMut(&mut P::Conn) -> Result<V, Error>,
    {
        self.retry.with_retry(|| {
            self.send_once(Some(endpoint), &mut operation, timeout_ms)
        })
    }

    /// One selection pass, without the outer retry policy: pick a target
    /// endpoint, claim a connection for it, run the operation, and fail over
    /// to another endpoint when the attempt fails.
    ///
    /// Selection yielding no endpoint is terminal and fails with
    /// `Error::NoConnectionAvailable`. Any other attempt failure (claim
    /// timeout, connect failure, operation error) blacklists the endpoint,
    /// notifies the router's `on_error` hook, and re-selects; failover stops
    /// once the number of attempts reaches the number of endpoints the
    /// router currently knows about, at which point the last failure is
    /// surfaced as an `Error::Attempt` carrying the endpoint, the attempt
    /// index, and a snapshot of the known endpoints. The bound gives every
    /// endpoint one chance per pass and holds even when a routing policy
    /// misbehaves.
    pub fn send_once<F, V>(
        &self,
        explicit: Option<&Endpoint>,
        operation: &mut F,
        timeout_ms: Option<u64>,
    ) -> Result<V, Error>
    where
        F: FnMut(&mut P::Conn) -> Result<V, Error>,
    {
        let mut attempt: u32 = 0;
        loop {
            let target = match explicit {
                Some(endpoint) => endpoint.clone(),
                None => match self.router.select_host() {
                    Some(endpoint) => endpoint,
                    None => return Err(Error::NoConnectionAvailable),
                },
            };

            let cause = match self.attempt(&target, operation, timeout_ms) {
                Ok(value) => return Ok(value),
                Err(cause) => cause,
            };

            // Attempt failures are not logged here; the error context bubbles
            // to the retry policy and the caller.
            self.router.blacklist(&target);
            self.router.on_error(&target, &cause);

            let endpoints = self.router.hosts();
            let exhausted = (attempt as usize) + 1 >= endpoints.len();
            let wrapped = AttemptError {
                endpoint: target,
                attempt,
                endpoints,
                cause: Box::new(cause),
            };

            if exhausted {
                return Err(Error::Attempt(wrapped));
            }
            attempt += 1;
        }
    }

    // One acquire-execute-release/invalidate cycle against a single
    // endpoint. The connection ends up back in the pool's custody on exactly
    // one path: released on success, invalidated on any failure.
    fn attempt<F, V>(
        &self,
        endpoint: &Endpoint,
        operation: &mut F,
        timeout_ms: Option<u64>,
    ) -> Result<V, Error>
    where
        F: FnMut(&mut P::Conn) -> Result<V, Error>,
    {
        let mut conn = self.pool.acquire(endpoint, timeout_ms)?;
        match operation(&mut conn) {
            Ok(value) => {
                // The operation already succeeded; a release failure must
                // not mask the result.
                if let Err(err) = self.pool.release(endpoint, conn) {
                    warn!(
                        self.log,
                        "failed to return connection for endpoint {} \
                         to the pool: {}",
                        endpoint,
                        err
                    );
                }
                Ok(value)
            }
            Err(err) => {
                self.pool.invalidate(endpoint, conn);
                Err(err)
            }
        }
    }

    /// Add an endpoint to the routing policy's candidate set.
    pub fn add_host(&self, endpoint: Endpoint) {
        self.router.add_host(endpoint)
    }

    /// Remove an endpoint from the routing policy's candidate set and
    /// blacklist.
    pub fn remove_host(&self, endpoint: &Endpoint) {
        self.router.remove_host(endpoint)
    }

    /// Exclude an endpoint from selection until it is explicitly removed.
    pub fn blacklist_host(&self, endpoint: &Endpoint) {
        self.router.blacklist(endpoint)
    }

    /// Whether the endpoint is currently excluded from selection.
    pub fn is_blacklisted(&self, endpoint: &Endpoint) -> bool {
        self.router.is_blacklisted(endpoint)
    }

    /// The set of endpoints currently known to the routing policy.
    pub fn hosts(&self) -> HashSet<Endpoint> {
        self.router.hosts()
    }

    /// Close every pooled connection across all endpoints.
    pub fn close(&self) {
        self.pool.close()
    }
}
