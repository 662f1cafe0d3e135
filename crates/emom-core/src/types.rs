//! Structs carried on the wire and inside the sealed envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-connection emom sequence number.
pub type Seqno = u64;

/// Sequence number assigned by the underlying transport. Lives in a
/// different number space from [`Seqno`].
pub type TransportSeqno = u64;

/// 16-byte user identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub [u8; 16]);

impl Uid {
    /// Parse from 32 hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self)
    }
}

/// Generation of the server's long-term box key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyGeneration(pub u32);

impl fmt::Display for KeyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Client's ephemeral X25519 public key, used as its identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EphemeralKeyId(pub [u8; 32]);

impl fmt::Debug for EphemeralKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EphemeralKeyId({})", hex::encode(&self.0[..8]))
    }
}

/// Ed25519 verifying key of the token signer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningKeyId(pub [u8; 32]);

impl fmt::Debug for SigningKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKeyId({})", hex::encode(&self.0[..8]))
    }
}

/// A server public key for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPublicKey {
    pub generation: KeyGeneration,
    pub public_key: [u8; 32],
}

/// Announces which server key the client encrypts against and which
/// ephemeral key it used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u32,
    pub server_key_generation: KeyGeneration,
    pub ephemeral_key_id: EphemeralKeyId,
}

/// Binds a user to an ephemeral key at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Unix seconds.
    pub creation_time: i64,
    pub ephemeral_key_id: EphemeralKeyId,
    pub uid: Uid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuthToken {
    pub token: AuthToken,
    pub signing_key_id: SigningKeyId,
    /// 64-byte Ed25519 signature over the canonical encoding of `token`.
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPlaintext {
    pub seqno: Seqno,
    pub method: String,
    pub args: Vec<u8>,
    /// Present on the call that establishes the session.
    pub auth_token: Option<SignedAuthToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePlaintext {
    /// Echo of the request's seqno.
    pub seqno: Seqno,
    pub result: Vec<u8>,
    pub error: Option<Vec<u8>>,
}

/// Wire envelope: sequence number plus sealed plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEnc {
    /// Doubles as the nonce's sequence component.
    pub seqno: Seqno,
    pub ciphertext: Vec<u8>,
}

/// The single argument of an encrypted call on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArg {
    pub handshake: Option<Handshake>,
    pub auth_enc: AuthEnc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_hex_roundtrip() {
        let uid = Uid([0xab; 16]);
        let text = uid.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(Uid::parse(&text), Some(uid));
    }

    #[test]
    fn test_uid_parse_rejects_wrong_length() {
        assert_eq!(Uid::parse("abcd"), None);
        assert_eq!(Uid::parse("not hex at all"), None);
    }

    #[test]
    fn test_generations_order() {
        assert!(KeyGeneration(1) < KeyGeneration(2));
        assert_eq!(KeyGeneration(3).to_string(), "gen-3");
    }
}
