use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vss_core::SignalTree;
use vss_server::{Authenticator, PermDaemonClient, ServerConfig, TlsConfig, VssServer};

/// In-memory vehicle signal server speaking the VSS WebSocket protocol.
#[derive(Debug, Parser)]
#[command(name = "vssd", version, about)]
struct Args {
    /// VSS signal tree document loaded at startup.
    #[arg(long, env = "VSSD_VSS_JSON", default_value = "vss_rel_2.0.json")]
    vss: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// Server certificate (PEM).
    #[arg(long, default_value = "Server.pem")]
    cert: PathBuf,

    /// Server private key (PEM).
    #[arg(long, default_value = "Server.key")]
    key: PathBuf,

    /// Public key for JWT verification (PEM).
    #[arg(long, default_value = "jwt.key.pub")]
    jwt_pubkey: PathBuf,

    /// Serve plain WebSocket without TLS.
    #[arg(long)]
    insecure: bool,

    /// Address of the permission management daemon (host:port).
    #[arg(long)]
    permd: Option<String>,

    /// Log verbosity.
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Info,
    Verbose,
}

impl LogLevel {
    fn filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Info => "info",
            Self::Verbose => "debug",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG overrides the --log-level mapping
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level.filter())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let document = std::fs::read_to_string(&args.vss)
        .with_context(|| format!("reading VSS document {}", args.vss.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&document).context("parsing VSS document")?;
    let tree = SignalTree::from_document(&document).context("building signal tree")?;
    tracing::info!(
        leaves = tree.leaf_count(),
        "signal tree initialised from {}",
        args.vss.display()
    );

    let jwt_pem = std::fs::read(&args.jwt_pubkey)
        .with_context(|| format!("reading JWT public key {}", args.jwt_pubkey.display()))?;
    let auth = Authenticator::rs256_from_pem(&jwt_pem).context("loading JWT public key")?;

    let tls = if args.insecure {
        tracing::warn!("TLS disabled, serving plain WebSocket");
        None
    } else {
        Some(TlsConfig {
            cert: args.cert,
            key: args.key,
        })
    };

    let bind_addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .context("invalid listen address")?;
    let daemon = args.permd.map(PermDaemonClient::new);

    let server = VssServer::new(ServerConfig { bind_addr, tls }, tree, auth, daemon);
    let engine = server.subscription_engine();

    tokio::select! {
        result = server.run() => {
            result.context("server terminated")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    engine.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
