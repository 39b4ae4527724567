//! The garble relay engine. [`Proxy`] accepts client connections, dials the
//! configured upstream for each one and relays bytes in both directions
//! through the impairment decisions of [`garble_impair`], while a shared
//! [`ProxyStats`] records what happened for a reporting consumer.

use std::fmt;

use thiserror::Error;

mod conn;
mod forward;
mod server;
mod stats;

pub use server::Proxy;
pub use stats::ProxyStats;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] garble_impair::ConfigError),
}

/// The two relay directions of a proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream.
    Request,
    /// Upstream to client.
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}
