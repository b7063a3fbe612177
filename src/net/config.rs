use std::{
    io,
    net::{IpAddr, Ipv4Addr},
};

use serde::Deserialize;
use tokio::net::TcpListener;

/// Network configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The host address.
    pub host: IpAddr,

    /// The port number.
    pub port: u16,

    /// Min number of milliseconds to wait for when retrying to accept a new connection.
    pub min_backoff_ms: u64,

    /// Max number of milliseconds to wait for when retrying to accept a new connection.
    pub max_backoff_ms: u64,

    /// Max number of concurrent connections that can be served by the server.
    pub max_connections: usize,
}

impl Config {
    /// Bind to the TCP address given by the host and port.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(&format!("{}:{}", self.host, self.port)).await
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: crate::DEFAULT_PORT,
            min_backoff_ms: 1,
            max_backoff_ms: 64000,
            max_connections: 128,
        }
    }
}
