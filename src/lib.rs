// Copyright 2020 Joyent, Inc.

//! A multi-endpoint connection driver
//!
//! Bankshot gives applications database-driver-grade reliability semantics
//! for raw, long-lived network connections to one of several equivalent
//! server endpoints: when the straight shot misses, play the bank. A
//! [`Driver`](driver/struct.Driver.html) bundles three pluggable pieces and
//! orchestrates them on every send:
//!
//! * a [`ConnectionPool`](pool/trait.ConnectionPool.html) that hands out and
//!   takes back connections keyed by endpoint,
//! * a [`Router`](routing/trait.Router.html) that owns the candidate endpoint
//!   set and a blacklist and picks a target for each attempt, and
//! * a [`RetryPolicy`](retry/trait.RetryPolicy.html) that bounds how many
//!   times a whole send is re-run after it fails.
//!
//! Each send claims a connection for the selected endpoint, runs the
//! caller-supplied operation on it, and either returns the connection to the
//! pool (on success) or invalidates it and blacklists the endpoint (on any
//! failure) before failing over to another endpoint. Failover within one
//! send is bounded by the number of endpoints the router knows about, and the
//! retry policy bounds whole-send repetitions on top of that, so no failure
//! is ever retried infinitely.
//!
//! The driver is synchronous and thread-safe: a single `Driver` is shared by
//! arbitrarily many caller threads, and only the connection claim blocks,
//! bounded by the per-send timeout.
//!
//! # Example
//!
//! ```rust,ignore
//! use bankshot::driver::{Driver, DriverOptions};
//! use bankshot::endpoint::Endpoint;
//! use bankshot::error::Error;
//!
//! fn main() -> Result<(), Error> {
//!     let options = DriverOptions {
//!         endpoints: vec![
//!             Endpoint::new("10.0.0.1", 5432),
//!             Endpoint::new("10.0.0.2", 5432),
//!             Endpoint::new("10.0.0.3", 5432),
//!         ],
//!         ..Default::default()
//!     };
//!
//!     let driver = Driver::new(options, |endpoint| {
//!         MyConnection::new(endpoint)
//!     });
//!
//!     let reply = driver.send(|conn| conn.request(b"ping"), Some(1000))?;
//!     driver.close();
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod retry;
pub mod routing;
