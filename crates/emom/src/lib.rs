//! emom: an authenticated, encrypted, order-verified RPC envelope.
//!
//! Wraps every call of an ordinary framed RPC transport in an encrypted
//! envelope so that a relay in the middle can neither read payloads nor
//! reorder, drop, replay, or swap replies without one end noticing.
//!
//! This crate provides:
//! - [`Client`]: seqno issuance, handshake on first call, reply correlation
//!   and a per-connection fatal error latch
//! - [`Server`]: strictly ordered admission, handshake and token
//!   verification, dispatch to registered [`Protocol`] handlers
//! - [`Sequencer`]: the server's ascending-order admission gate
//! - The [`Transport`] / [`RpcService`] contract and an in-process
//!   [`LoopbackTransport`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use emom::{Client, EmomConfig, LoopbackTransport, Protocol, Server};
//! use emom_core::Uid;
//! use emom_crypto::{
//!     IdentityKeypair, KeyringClientCryptoer, KeyringServerCryptoer, ServerKeyring,
//!     StaticDirectory,
//! };
//! use parking_lot::RwLock;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> emom_core::Result<()> {
//! let config = EmomConfig::default();
//! let keyring = Arc::new(RwLock::new(ServerKeyring::generate()));
//! let directory = Arc::new(StaticDirectory::new());
//! let identity = IdentityKeypair::generate(Uid([1; 16]));
//! directory.add(identity.uid(), identity.verifying_key());
//!
//! let server = Arc::new(Server::new(
//!     &config,
//!     Arc::new(KeyringServerCryptoer::new(keyring.clone(), directory, config.token_freshness())),
//! ));
//! server.register(Protocol::new("ae.1").method("C", |x: u64| async move { Ok(x + 1) }))?;
//!
//! let server_key = keyring.read().current().expect("keyring has a generation");
//! let client = Client::new(
//!     &config,
//!     Arc::new(LoopbackTransport::new(server)),
//!     Arc::new(KeyringClientCryptoer::new(identity, server_key)),
//! );
//! let out: u64 = client.call(&CancellationToken::new(), "ae.1.C", &41u64).await?;
//! assert_eq!(out, 42);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod correlation;
pub mod loopback;
pub mod protocol;
pub mod sequencer;
pub mod server;
pub mod transport;

pub use client::Client;
pub use config::EmomConfig;
pub use correlation::{Correlator, Latch};
pub use loopback::LoopbackTransport;
pub use protocol::{ErrorUnwrapper, ErrorWrapper, Protocol, StringErrors};
pub use sequencer::{Admission, Sequencer};
pub use server::Server;
pub use transport::{ReplySequencer, RpcService, SendNotifier, ServedReply, Transport};

pub use emom_core::{EmomError, Result};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set. Does nothing if a subscriber is already
/// installed.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
