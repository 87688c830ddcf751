//! Client for the external permission-management daemon.
//!
//! The daemon exchanges one newline-delimited JSON message per request:
//! `{"clientid", "secret"}` in, `{"token", "pubkey"}` out. The whole
//! exchange runs under one timeout; an unreachable or silent daemon shapes
//! into the 501 response upstream.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("permission daemon unreachable: {0}")]
    Unreachable(String),
    #[error("permission daemon sent a malformed reply: {0}")]
    Malformed(String),
}

/// A token grant issued by the daemon: the JWT plus the public key that
/// verifies it.
#[derive(Debug, Deserialize)]
pub struct PermToken {
    pub token: String,
    pub pubkey: String,
}

#[derive(Debug, Clone)]
pub struct PermDaemonClient {
    addr: String,
    timeout: Duration,
}

impl PermDaemonClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Exchange client credentials for a token grant.
    pub async fn fetch_token(
        &self,
        clientid: &str,
        secret: &str,
    ) -> Result<PermToken, DaemonError> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| DaemonError::Unreachable(e.to_string()))?;
            let mut request = json!({"clientid": clientid, "secret": secret}).to_string();
            request.push('\n');
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| DaemonError::Unreachable(e.to_string()))?;

            let mut reply = String::new();
            BufReader::new(stream)
                .read_line(&mut reply)
                .await
                .map_err(|e| DaemonError::Unreachable(e.to_string()))?;
            serde_json::from_str(&reply).map_err(|e| DaemonError::Malformed(e.to_string()))
        };
        timeout(self.timeout, exchange)
            .await
            .map_err(|_| DaemonError::Unreachable("request timed out".to_string()))?
    }
}
