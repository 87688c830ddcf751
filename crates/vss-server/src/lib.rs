//! # vss-server
//!
//! The vehicle signal server: WebSocket transport, token-based
//! authorization, subscription fan-out and request dispatch on top of the
//! `vss-core` signal tree.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vss_server::{Authenticator, ServerConfig, VssServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let document = serde_json::from_str(&std::fs::read_to_string("vss_rel_2.0.json")?)?;
//!     let tree = vss_core::SignalTree::from_document(&document)?;
//!     let auth = Authenticator::rs256_from_pem(&std::fs::read("jwt.key.pub")?)?;
//!
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8090".parse()?,
//!         tls: None,
//!     };
//!     VssServer::new(config, tree, auth, None).run().await?;
//!     Ok(())
//! }
//! ```

mod auth;
mod command;
mod permd;
mod registry;
mod server;
mod subscription;

pub use auth::{AuthError, Authenticator};
pub use command::CommandProcessor;
pub use permd::{DaemonError, PermDaemonClient, PermToken};
pub use registry::{ConnectionRegistry, CLIENT_MASK};
pub use server::{ServerConfig, ServerError, TlsConfig, VssServer};
pub use subscription::{SubscriptionEngine, RAND_SPAN};
