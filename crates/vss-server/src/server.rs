//! WebSocket transport: accept loop, TLS, per-connection tasks.
//!
//! One task per connection reads frames and runs them through the command
//! processor; a paired writer task drains the connection's outbound buffer
//! (responses and subscription events share it, so ordering within one
//! connection is preserved). A closed connection tears down its
//! subscriptions before the channel is dropped.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use vss_core::{Channel, SignalTree};

use crate::auth::Authenticator;
use crate::command::CommandProcessor;
use crate::permd::PermDaemonClient;
use crate::registry::ConnectionRegistry;
use crate::subscription::SubscriptionEngine;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// TLS material; `None` serves plain WebSocket (`--insecure`).
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// The vehicle signal server: owns the tree, the authenticator and the
/// subscription engine, and serves them over WebSocket.
pub struct VssServer {
    config: ServerConfig,
    processor: Arc<CommandProcessor>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<SubscriptionEngine>,
}

impl VssServer {
    pub fn new(
        config: ServerConfig,
        tree: SignalTree,
        auth: Authenticator,
        daemon: Option<PermDaemonClient>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = SubscriptionEngine::new(Arc::clone(&registry));
        let processor = Arc::new(CommandProcessor::new(
            Arc::new(RwLock::new(tree)),
            Arc::new(auth),
            Arc::clone(&engine),
            daemon,
        ));
        Self {
            config,
            processor,
            registry,
            engine,
        }
    }

    /// Handle for stopping the delivery worker at shutdown.
    pub fn subscription_engine(&self) -> Arc<SubscriptionEngine> {
        Arc::clone(&self.engine)
    }

    /// Bind and serve until the future is dropped. Binding or TLS failures
    /// are fatal; per-connection failures are logged and absorbed.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener =
            TcpListener::bind(self.config.bind_addr)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: self.config.bind_addr,
                    source,
                })?;
        let acceptor = match &self.config.tls {
            Some(tls) => Some(build_acceptor(tls)?),
            None => None,
        };
        info!(
            "signal server listening on {}{}",
            self.config.bind_addr,
            if acceptor.is_some() { " (TLS)" } else { "" }
        );
        self.engine.start();

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("failed to accept connection: {e}");
                    continue;
                }
            };
            let processor = Arc::clone(&self.processor);
            let registry = Arc::clone(&self.registry);
            let engine = Arc::clone(&self.engine);

            match acceptor.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                if let Err(e) =
                                    handle_connection(tls_stream, addr, processor, registry, engine)
                                        .await
                                {
                                    debug!("connection from {addr} ended: {e}");
                                }
                            }
                            Err(e) => warn!("TLS handshake with {addr} failed: {e}"),
                        }
                    });
                }
                None => {
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, processor, registry, engine).await
                        {
                            debug!("connection from {addr} ended: {e}");
                        }
                    });
                }
            }
        }
    }
}

fn build_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let mut cert_reader = BufReader::new(
        File::open(&tls.cert)
            .map_err(|e| ServerError::Tls(format!("opening {}: {e}", tls.cert.display())))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("reading certificates: {e}")))?;

    let mut key_reader = BufReader::new(
        File::open(&tls.key)
            .map_err(|e| ServerError::Tls(format!("opening {}: {e}", tls.key.display())))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ServerError::Tls(format!("reading private key: {e}")))?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {}", tls.key.display())))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    processor: Arc<CommandProcessor>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<SubscriptionEngine>,
) -> Result<(), tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    use futures::{SinkExt, StreamExt};

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let Some(conn_id) = registry.register(outbound.clone()) else {
        warn!("rejecting {addr}: connection table full");
        return Ok(());
    };
    info!(%addr, conn_id, "client connected");
    let mut channel = Channel::new(conn_id);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(reply) = processor.process(&text, &mut channel).await {
                    if outbound.send(Message::Text(reply)).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => {
                info!(conn_id, "client closed connection");
                break;
            }
            Ok(_) => {} // binary and pong frames are ignored
            Err(e) => {
                debug!(conn_id, "websocket error: {e}");
                break;
            }
        }
    }

    engine.unsubscribe_all(conn_id);
    registry.unregister(conn_id);
    writer.abort();
    info!(conn_id, "client disconnected");
    Ok(())
}
