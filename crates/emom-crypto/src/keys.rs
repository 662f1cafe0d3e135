//! X25519 key agreement: client ephemeral keys and the server keyring.
//!
//! The server holds one long-term box key per [`KeyGeneration`]. During a
//! rollover several generations are accepted at once; a client encrypts
//! against whichever generation it was given and names it in the handshake.

use emom_core::{EmomError, EphemeralKeyId, KeyGeneration, Result, ServerPublicKey};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use tracing::info;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::session::SessionKey;

/// Client side of the agreement: fresh ephemeral key against the server's
/// public key.
///
/// Returns the ephemeral key id to announce in the handshake and the
/// derived session key.
pub fn client_agree(server: &ServerPublicKey) -> Result<(EphemeralKeyId, SessionKey)> {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral = EphemeralKeyId(*PublicKey::from(&secret).as_bytes());

    let shared = secret.diffie_hellman(&PublicKey::from(server.public_key));
    if !shared.was_contributory() {
        return Err(EmomError::handshake("non-contributory server public key"));
    }

    let key = SessionKey::derive(&shared, &ephemeral, &server.public_key);
    Ok((ephemeral, key))
}

/// The server's long-term box keys, by generation.
pub struct ServerKeyring {
    generations: BTreeMap<KeyGeneration, StaticSecret>,
}

impl ServerKeyring {
    /// Keyring with a single freshly generated key at generation 1.
    pub fn generate() -> Self {
        let mut keyring = Self::empty();
        keyring.insert(KeyGeneration(1), StaticSecret::random_from_rng(OsRng));
        keyring
    }

    pub fn empty() -> Self {
        Self {
            generations: BTreeMap::new(),
        }
    }

    /// Add (or replace) the secret for one generation.
    pub fn insert(&mut self, generation: KeyGeneration, secret: StaticSecret) {
        self.generations.insert(generation, secret);
    }

    /// Add a new key one generation past the newest. Older generations stay
    /// accepted until retired.
    pub fn rotate(&mut self) -> ServerPublicKey {
        let next = self
            .generations
            .keys()
            .next_back()
            .map(|g| KeyGeneration(g.0 + 1))
            .unwrap_or(KeyGeneration(1));

        let secret = StaticSecret::random_from_rng(OsRng);
        let public = ServerPublicKey {
            generation: next,
            public_key: *PublicKey::from(&secret).as_bytes(),
        };
        self.generations.insert(next, secret);

        info!(generation = %next, "rotated server key");
        public
    }

    /// Stop accepting a generation. Returns whether it was present.
    pub fn retire(&mut self, generation: KeyGeneration) -> bool {
        let removed = self.generations.remove(&generation).is_some();
        if removed {
            info!(generation = %generation, "retired server key");
        }
        removed
    }

    pub fn is_accepted(&self, generation: KeyGeneration) -> bool {
        self.generations.contains_key(&generation)
    }

    /// Public key of the newest generation.
    pub fn current(&self) -> Option<ServerPublicKey> {
        self.generations
            .iter()
            .next_back()
            .map(|(generation, secret)| to_public(*generation, secret))
    }

    pub fn public_key(&self, generation: KeyGeneration) -> Option<ServerPublicKey> {
        self.generations
            .get(&generation)
            .map(|secret| to_public(generation, secret))
    }

    /// Server side of the agreement for a client's announced generation and
    /// ephemeral key.
    pub fn agree(
        &self,
        generation: KeyGeneration,
        ephemeral: &EphemeralKeyId,
    ) -> Result<SessionKey> {
        let secret = self.generations.get(&generation).ok_or_else(|| {
            EmomError::handshake(format!("server key {generation} not accepted"))
        })?;

        let shared = secret.diffie_hellman(&PublicKey::from(ephemeral.0));
        if !shared.was_contributory() {
            return Err(EmomError::handshake("non-contributory ephemeral key"));
        }

        let server_public = PublicKey::from(secret);
        Ok(SessionKey::derive(&shared, ephemeral, server_public.as_bytes()))
    }
}

fn to_public(generation: KeyGeneration, secret: &StaticSecret) -> ServerPublicKey {
    ServerPublicKey {
        generation,
        public_key: *PublicKey::from(secret).as_bytes(),
    }
}
