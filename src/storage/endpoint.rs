//! Endpoint URL resolution for the object store.

use std::fmt;

/// Scheme assumed when the configured host has none.
const DEFAULT_SCHEME: &str = "https://";

/// Resolved store endpoint: `<host>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEndpoint {
    host: String,
    port: u16,
    url: String,
}

impl StorageEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        let url = resolve_endpoint(host, port);
        Self {
            host: host.to_string(),
            port,
            url,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Canonical endpoint URL handed to the client.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for StorageEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Normalize `host` and append `port`.
///
/// Exactly one trailing `/` is removed; a host without a scheme gets
/// `https://`.
pub fn resolve_endpoint(host: &str, port: u16) -> String {
    let host = host.strip_suffix('/').unwrap_or(host);
    if host.contains("://") {
        format!("{host}:{port}")
    } else {
        format!("{DEFAULT_SCHEME}{host}:{port}")
    }
}
