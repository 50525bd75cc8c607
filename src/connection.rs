// Copyright 2020 Joyent, Inc.

use std::error;

/// Bankshot connection
///
/// The `Connection` trait defines the establish and teardown seam for the
/// connections a pool manages. A connection need not be limited to a TCP
/// socket, but could be any logical notion of a connection to a service, as
/// long as it obeys a similar interface to a socket. For example, it could be
/// a database session that authenticates before it is considered *connected*.
pub trait Connection: Send + Sized + 'static {
    /// The error type returned by the `connect` or `close` functions. This is
    /// an associated type for the trait meaning each specific implementation
    /// of the `Connection` trait may choose the appropriate concrete error
    /// type to return. The only constraint applied is that the selected error
    /// type must implement the
    /// [Error](https://doc.rust-lang.org/std/error/trait.Error.html) trait
    /// from the standard library.
    type Error: error::Error;

    /// Attempt to establish the connection to an endpoint. The pool invokes
    /// this after the caller-supplied factory function has produced a new
    /// instance for an endpoint; until `connect` returns successfully the
    /// connection is never handed to a claimant.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the connection to the endpoint.
    fn close(&mut self) -> Result<(), Self::Error>;
}
