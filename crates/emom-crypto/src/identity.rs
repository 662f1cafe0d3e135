//! Ed25519 user identity and signed auth tokens.
//!
//! A user proves who they are by signing an [`AuthToken`] that binds their
//! [`Uid`] to the ephemeral key of the current handshake and the current
//! time. The signature covers the canonical encoding of the token.
//!
//! # Example
//!
//! ```
//! use emom_core::{AuthToken, EphemeralKeyId, Uid};
//! use emom_crypto::identity::{verify_token, IdentityKeypair};
//!
//! let keypair = IdentityKeypair::generate(Uid([1u8; 16]));
//! let token = AuthToken {
//!     creation_time: 1_700_000_000,
//!     ephemeral_key_id: EphemeralKeyId([9u8; 32]),
//!     uid: keypair.uid(),
//! };
//!
//! let signed = keypair.sign_token(token).unwrap();
//! assert!(verify_token(&signed, &keypair.verifying_key()).is_ok());
//! ```

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use emom_core::codec;
use emom_core::{AuthToken, EmomError, Result, SignedAuthToken, SigningKeyId, Uid};
use rand::rngs::OsRng;

/// A user's long-term signing identity.
///
/// The signing key is zeroized on drop by `ed25519-dalek`.
pub struct IdentityKeypair {
    uid: Uid,
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate(uid: Uid) -> Self {
        Self {
            uid,
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from raw signing key bytes.
    pub fn from_bytes(uid: Uid, bytes: &[u8; 32]) -> Self {
        Self {
            uid,
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Identifier the server uses to look the verifying key up.
    pub fn signing_key_id(&self) -> SigningKeyId {
        SigningKeyId(*self.signing_key.verifying_key().as_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign the canonical encoding of `token`.
    pub fn sign_token(&self, token: AuthToken) -> Result<SignedAuthToken> {
        let message = codec::encode(&token)?;
        let signature = self.signing_key.sign(&message).to_bytes().to_vec();

        Ok(SignedAuthToken {
            token,
            signing_key_id: self.signing_key_id(),
            signature,
        })
    }
}

/// Verify a signed token against a trusted verifying key.
///
/// Fails with [`EmomError::UserAuth`] if the token names a different
/// signing key, the signature is malformed, or it does not verify.
pub fn verify_token(signed: &SignedAuthToken, key: &VerifyingKey) -> Result<()> {
    if key.as_bytes() != &signed.signing_key_id.0 {
        return Err(EmomError::user_auth("token signing key id does not match"));
    }

    let signature = Signature::from_slice(&signed.signature)
        .map_err(|_| EmomError::user_auth("malformed token signature"))?;

    let message = codec::encode(&signed.token)?;
    key.verify(&message, &signature)
        .map_err(|_| EmomError::user_auth("bad token signature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emom_core::EphemeralKeyId;

    fn token_for(keypair: &IdentityKeypair) -> AuthToken {
        AuthToken {
            creation_time: 1_700_000_000,
            ephemeral_key_id: EphemeralKeyId([5u8; 32]),
            uid: keypair.uid(),
        }
    }

    #[test]
    fn test_sign_verify() {
        let keypair = IdentityKeypair::generate(Uid([1u8; 16]));
        let signed = keypair.sign_token(token_for(&keypair)).unwrap();

        assert_eq!(signed.signature.len(), 64);
        assert!(verify_token(&signed, &keypair.verifying_key()).is_ok());
    }

    #[test]
    fn test_tampered_token_fails() {
        let keypair = IdentityKeypair::generate(Uid([1u8; 16]));
        let mut signed = keypair.sign_token(token_for(&keypair)).unwrap();

        signed.token.creation_time += 1;
        assert!(matches!(
            verify_token(&signed, &keypair.verifying_key()),
            Err(EmomError::UserAuth(_))
        ));
    }

    #[test]
    fn test_other_key_fails() {
        let keypair = IdentityKeypair::generate(Uid([1u8; 16]));
        let other = IdentityKeypair::generate(Uid([1u8; 16]));
        let signed = keypair.sign_token(token_for(&keypair)).unwrap();

        assert!(verify_token(&signed, &other.verifying_key()).is_err());
    }

    #[test]
    fn test_keypair_bytes_roundtrip() {
        let keypair = IdentityKeypair::generate(Uid([2u8; 16]));
        let restored =
            IdentityKeypair::from_bytes(keypair.uid(), &keypair.signing_key.to_bytes());
        assert_eq!(restored.signing_key_id(), keypair.signing_key_id());
    }
}
