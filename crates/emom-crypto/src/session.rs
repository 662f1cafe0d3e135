//! Session keys and per-message authenticated encryption.
//!
//! Every message is sealed with XChaCha20-Poly1305 under the session key,
//! using the domain-separated nonce from [`emom_core::make_nonce`]. Because
//! the nonce is explicit, replies can be opened in whatever order they
//! arrive.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use emom_core::codec;
use emom_core::{make_nonce, AuthEnc, Direction, EmomError, EphemeralKeyId, Result, Seqno};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// KDF label mixed into every session key.
const SESSION_KEY_LABEL: &[u8] = b"emom-session-key-v1";

/// Symmetric key shared by one client connection and the server.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; 32],
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl SessionKey {
    /// Derive from an X25519 shared secret.
    ///
    /// key = SHA-256(label || shared || ephemeral_public || server_public)
    pub fn derive(
        shared: &SharedSecret,
        ephemeral: &EphemeralKeyId,
        server_public: &[u8; 32],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SESSION_KEY_LABEL);
        hasher.update(shared.as_bytes());
        hasher.update(ephemeral.0);
        hasher.update(server_public);
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.key).into())
    }

    /// Seal `plaintext` under nonce(direction, seqno).
    pub fn seal(&self, direction: Direction, seqno: Seqno, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = make_nonce(direction, seqno);
        self.cipher()
            .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|e| EmomError::Encryption(e.to_string()))
    }

    /// Open a ciphertext sealed under nonce(direction, seqno).
    pub fn open(&self, direction: Direction, seqno: Seqno, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = make_nonce(direction, seqno);
        self.cipher()
            .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
            .map_err(|_| EmomError::Decryption)
    }

    /// Encode and seal a plaintext struct into an envelope.
    pub fn seal_envelope<T: Serialize>(
        &self,
        direction: Direction,
        seqno: Seqno,
        plaintext: &T,
    ) -> Result<AuthEnc> {
        let encoded = codec::encode(plaintext)?;
        let ciphertext = self.seal(direction, seqno, &encoded)?;
        Ok(AuthEnc { seqno, ciphertext })
    }

    /// Open an envelope and decode its plaintext struct.
    pub fn open_envelope<T: DeserializeOwned>(
        &self,
        direction: Direction,
        envelope: &AuthEnc,
    ) -> Result<T> {
        let plaintext = self.open(direction, envelope.seqno, &envelope.ciphertext)?;
        codec::decode(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emom_core::ResponsePlaintext;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key(1);
        for direction in [Direction::Call, Direction::Reply] {
            for seqno in [0, 1, 99, u64::MAX] {
                let ct = k.seal(direction, seqno, b"payload").unwrap();
                assert_eq!(k.open(direction, seqno, &ct).unwrap(), b"payload");
            }
        }
    }

    #[test]
    fn test_call_ciphertext_fails_under_reply_nonce() {
        let k = key(1);
        let ct = k.seal(Direction::Call, 5, b"payload").unwrap();
        assert_eq!(
            k.open(Direction::Reply, 5, &ct),
            Err(EmomError::Decryption)
        );
    }

    #[test]
    fn test_wrong_key_or_seqno_fails() {
        let ct = key(1).seal(Direction::Call, 5, b"payload").unwrap();
        assert!(key(2).open(Direction::Call, 5, &ct).is_err());
        assert!(key(1).open(Direction::Call, 6, &ct).is_err());
    }

    #[test]
    fn test_tamper_detection() {
        let k = key(3);
        let mut ct = k.seal(Direction::Reply, 1, b"sensitive data").unwrap();
        ct[0] ^= 0xff;
        assert_eq!(k.open(Direction::Reply, 1, &ct), Err(EmomError::Decryption));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let k = key(4);
        let response = ResponsePlaintext {
            seqno: 12,
            result: vec![1, 2, 3],
            error: None,
        };

        let envelope = k.seal_envelope(Direction::Reply, 12, &response).unwrap();
        assert_eq!(envelope.seqno, 12);

        let opened: ResponsePlaintext = k.open_envelope(Direction::Reply, &envelope).unwrap();
        assert_eq!(opened, response);
    }
}
