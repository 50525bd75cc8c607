// Copyright 2020 Joyent, Inc.

use std::collections::HashSet;
use std::error::Error as StdError;

use thiserror::Error;

use crate::endpoint::Endpoint;

/// The error type for driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No non-blacklisted endpoint exists, or none are configured. Terminal
    /// for a single selection pass; only the outer retry policy may re-run
    /// the whole call.
    #[error("no non-blacklisted endpoint is available")]
    NoConnectionAvailable,

    /// The pool could not supply a connection for the endpoint within the
    /// claim timeout. Counts as an ordinary attempt failure: the endpoint is
    /// blacklisted and failover continues.
    #[error("timed out claiming a connection for endpoint {0}")]
    ClaimTimeout(Endpoint),

    /// Establishing a new connection to the endpoint failed.
    #[error("failed to establish a connection to {endpoint}: {reason}")]
    ConnectFailed {
        /// The endpoint the connection was for.
        endpoint: Endpoint,
        /// Rendering of the underlying connect error.
        reason: String,
    },

    /// The caller-supplied operation failed. The connection it ran on is
    /// always invalidated, never returned to the pool.
    #[error("operation failed: {0}")]
    Operation(#[source] Box<dyn StdError + Send + Sync>),

    /// A failed attempt against a specific endpoint, wrapped with the context
    /// needed to decide failover eligibility and to surface a useful final
    /// error once the attempt bound is exhausted.
    #[error(transparent)]
    Attempt(#[from] AttemptError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for driver misuse and internal accounting failures.
    #[error("{0}")]
    Driver(String),
}

impl Error {
    /// Wrap an arbitrary failure raised by a caller-supplied operation.
    pub fn operation<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Operation(Box::new(err))
    }
}

/// Context for one failed attempt against one endpoint.
#[derive(Debug, Error)]
#[error("attempt {attempt} against endpoint {endpoint} failed: {cause}")]
pub struct AttemptError {
    /// The endpoint the attempt ran against.
    pub endpoint: Endpoint,
    /// Zero-based index of the attempt within one selection pass.
    pub attempt: u32,
    /// Snapshot of the endpoints known to the routing policy when the
    /// attempt failed.
    pub endpoints: HashSet<Endpoint>,
    /// The underlying failure.
    #[source]
    pub cause: Box<Error>,
}
