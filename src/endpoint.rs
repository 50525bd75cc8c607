// Copyright 2020 Joyent, Inc.

use base64;
use sha1::Sha1;

use derive_more::{Display, From, Into};

/// A base64 encoded identifier derived from the fields of an endpoint. Used
/// by the pool to key the connections belonging to one endpoint.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct EndpointKey(String);

/// The port number for an endpoint. This is a type alias for u16.
pub type EndpointPort = u16;

/// One server instance among a set of equivalent alternatives, identified by
/// host and port. Two endpoints are equal iff both fields match exactly.
/// `Endpoint` is the key used everywhere in the driver: for pool claims, for
/// routing set membership, and for blacklist membership.
#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialOrd, PartialEq)]
#[display(fmt = "{}:{}", host, port)]
pub struct Endpoint {
    /// The hostname or address of the endpoint.
    pub host: String,
    /// The port of the endpoint.
    pub port: EndpointPort,
}

impl Endpoint {
    /// Return a new instance of `Endpoint` for the given host and port.
    pub fn new(host: &str, port: EndpointPort) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Return a base64 encoded identifier based on the fields of the
    /// endpoint.
    pub fn key(&self) -> EndpointKey {
        let mut sha1 = Sha1::new();
        sha1.update(self.host.as_bytes());
        sha1.update(b"||");
        sha1.update(self.port.to_string().as_bytes());

        base64::encode(&sha1.digest().bytes()).into()
    }
}
