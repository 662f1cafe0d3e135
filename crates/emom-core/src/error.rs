//! Error taxonomy for emom calls.

use thiserror::Error;

use crate::types::Seqno;

/// Result type alias using emom's error type.
pub type Result<T> = std::result::Result<T, EmomError>;

/// Every failure an emom call can surface.
///
/// `Clone` so a latched sequencing error can be handed to every later call
/// on the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmomError {
    /// Local encoding failure; aborts one call.
    #[error("encode error: {0}")]
    Encode(String),

    /// Local decoding failure; aborts one call.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// MAC check failed: wrong key, wrong nonce, or tampered ciphertext.
    #[error("decryption failed: message authentication failed")]
    Decryption,

    #[error("handshake error: {0}")]
    Handshake(String),

    /// The transport-level correlation between a call and its reply cannot
    /// be trusted. Latched for the connection.
    #[error("server sequence error: {0}")]
    ServerSequence(String),

    /// The transport dispatched calls out of issuance order. Latched for the
    /// connection.
    #[error("client sequence error: {0}")]
    ClientSequence(String),

    #[error("wrong reply: expected seqno {expected}, got {got}")]
    WrongReply { expected: Seqno, got: Seqno },

    #[error("sequencer timed out waiting to admit seqno {seqno}")]
    SequencerTimeout { seqno: Seqno },

    /// Seqno below the next admissible value, or already in flight.
    #[error("sequencing error: seqno {seqno} not admissible (expected {expected})")]
    Sequencing { seqno: Seqno, expected: Seqno },

    #[error("no session key")]
    NoSessionKey,

    #[error("user authentication failed: {0}")]
    UserAuth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("protocol already registered: {0}")]
    AlreadyRegistered(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Application error returned by the remote handler.
    #[error("remote error: {0}")]
    Remote(String),
}

impl EmomError {
    /// Create an encode error from any displayable type.
    pub fn encode(msg: impl std::fmt::Display) -> Self {
        Self::Encode(msg.to_string())
    }

    /// Create a decode error from any displayable type.
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    /// Create a handshake error from any displayable type.
    pub fn handshake(msg: impl std::fmt::Display) -> Self {
        Self::Handshake(msg.to_string())
    }

    /// Create a user authentication error from any displayable type.
    pub fn user_auth(msg: impl std::fmt::Display) -> Self {
        Self::UserAuth(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a server sequence error from any displayable type.
    pub fn server_sequence(msg: impl std::fmt::Display) -> Self {
        Self::ServerSequence(msg.to_string())
    }

    /// Create a client sequence error from any displayable type.
    pub fn client_sequence(msg: impl std::fmt::Display) -> Self {
        Self::ClientSequence(msg.to_string())
    }

    /// Whether this error poisons the whole connection once observed.
    pub fn is_latching(&self) -> bool {
        matches!(self, Self::ServerSequence(_) | Self::ClientSequence(_))
    }
}
