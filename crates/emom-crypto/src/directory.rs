//! Identity directory: resolves a claimed user to a trusted signing key.

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use emom_core::{EmomError, Result, SigningKeyId, Uid};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Resolves (uid, signing key id) to a verifying key the server trusts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fails with [`EmomError::UserAuth`] if the key is unknown or revoked
    /// for that user.
    async fn signing_key(&self, uid: Uid, kid: SigningKeyId) -> Result<VerifyingKey>;
}

/// In-memory directory.
#[derive(Default)]
pub struct StaticDirectory {
    keys: RwLock<HashMap<(Uid, SigningKeyId), VerifyingKey>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, uid: Uid, key: VerifyingKey) {
        let kid = SigningKeyId(*key.as_bytes());
        self.keys.write().insert((uid, kid), key);
    }

    pub fn revoke(&self, uid: Uid, kid: SigningKeyId) -> bool {
        self.keys.write().remove(&(uid, kid)).is_some()
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn signing_key(&self, uid: Uid, kid: SigningKeyId) -> Result<VerifyingKey> {
        self.keys
            .read()
            .get(&(uid, kid))
            .copied()
            .ok_or_else(|| EmomError::user_auth(format!("no signing key {kid:?} for user {uid}")))
    }
}
