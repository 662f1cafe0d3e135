//! Core emom protocol types, nonce construction, codec, and errors.
//!
//! This crate provides:
//! - Wire structs carried inside and around the encrypted envelope
//! - The domain-separated nonce builder
//! - The canonical bincode codec used for every struct on the wire
//! - The error taxonomy shared by client and server
//!
//! # Wire Layout
//!
//! ```text
//! CallArg  = [Option<Handshake>] [AuthEnc]
//! AuthEnc  = [seqno: u64] [ciphertext = seal(RequestPlaintext | ResponsePlaintext)]
//! ```
//!
//! The handshake travels in the clear next to the ciphertext so the server
//! can derive the session key before decrypting. The signed auth token lives
//! inside the request plaintext, so the caller's identity never reaches the
//! relay.

#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod nonce;
pub mod types;

pub use error::{EmomError, Result};
pub use nonce::{make_nonce, Direction, Nonce, NONCE_SIZE};
pub use types::*;

/// Protocol version announced in every handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Transport method name carrying encrypted calls.
pub const CALL_METHOD: &str = "emom.1.C";

/// Transport method name carrying notifications.
pub const NOTIFY_METHOD: &str = "emom.1.N";
