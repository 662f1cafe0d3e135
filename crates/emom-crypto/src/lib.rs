//! Cryptographic primitives for emom.
//!
//! This crate provides:
//! - Ed25519 user identities and signed auth tokens
//! - X25519 key agreement against a generation-rotated server keyring
//! - XChaCha20-Poly1305 session encryption with explicit, domain-separated nonces
//! - Client and server cryptoers that build and verify the handshake
//! - The identity directory capability used to resolve signing keys
//!
//! # Design
//!
//! The client generates a fresh ephemeral X25519 key per connection and
//! agrees with the server's long-term key for one generation. Because every
//! message carries its sequence number and the nonce is derived from it,
//! replies can be opened out of order.

#![forbid(unsafe_code)]

pub mod cryptoer;
pub mod directory;
pub mod identity;
pub mod keys;
pub mod session;

pub use cryptoer::{
    ClientCryptoer, KeyringClientCryptoer, KeyringServerCryptoer, PendingSession, ServerCryptoer,
};
pub use directory::{StaticDirectory, UserDirectory};
pub use identity::IdentityKeypair;
pub use keys::ServerKeyring;
pub use session::SessionKey;
