//! Handshake construction and verification.
//!
//! Client and server need differently shaped capabilities, so they get two
//! traits:
//! - [`ClientCryptoer`]: attach handshake and auth material, expose the
//!   session key
//! - [`ServerCryptoer`]: verify an incoming handshake and auth token,
//!   expose the session key
//!
//! # Handshake Flow
//!
//! ```text
//! Client                                          Server
//!   |  CallArg { Handshake{gen, eph}, AuthEnc }     |
//!   |---------------------------------------------->|  agree(gen, eph) -> pending key
//!   |        RequestPlaintext.auth_token            |  open AuthEnc with pending key
//!   |        = sign(uid, eph, now)                  |  verify token via directory
//!   |                                               |  install session
//! ```
//!
//! A call that fails anywhere before the last step leaves the connection as
//! it was, so a forged first call cannot block the genuine handshake.
//!
//! Each connection owns one cryptoer; the session key lives exactly as long
//! as it does.

use async_trait::async_trait;
use chrono::Utc;
use emom_core::{
    AuthToken, CallArg, EmomError, EphemeralKeyId, Handshake, RequestPlaintext, Result,
    ServerPublicKey, Uid, PROTOCOL_VERSION,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::directory::UserDirectory;
use crate::identity::{verify_token, IdentityKeypair};
use crate::keys::{client_agree, ServerKeyring};
use crate::session::SessionKey;

/// Client-side crypto capability.
pub trait ClientCryptoer: Send + Sync {
    /// Establish a session if there is none: fill `handshake` and attach a
    /// signed auth token to `request`. No-op once a session key exists.
    fn init_client(
        &self,
        handshake: &mut Option<Handshake>,
        request: &mut RequestPlaintext,
    ) -> Result<()>;

    fn session_key(&self) -> Option<SessionKey>;
}

/// Session material derived from a handshake that has not been
/// authenticated yet. Nothing is installed on the connection until the
/// request it arrived with passes [`ServerCryptoer::check_auth_token`].
pub struct PendingSession {
    key: SessionKey,
    ephemeral: EphemeralKeyId,
}

impl PendingSession {
    /// Key to open the handshake-carrying request with.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

/// Server-side crypto capability.
#[async_trait]
pub trait ServerCryptoer: Send + Sync {
    /// Verify the clear-text handshake of an incoming call and derive its
    /// session key. Runs before the call is decrypted. Returns `None` for a
    /// call riding an established session.
    async fn init_server_handshake(&self, arg: &CallArg) -> Result<Option<PendingSession>>;

    /// Verify the auth token inside a decrypted request and, for a
    /// handshake-carrying call, install its session.
    async fn check_auth_token(
        &self,
        pending: Option<PendingSession>,
        request: &RequestPlaintext,
    ) -> Result<()>;

    fn session_key(&self) -> Option<SessionKey>;

    /// User the connection authenticated as, once it has.
    fn authenticated_uid(&self) -> Option<Uid>;
}

fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Client cryptoer backed by a user identity and one server public key.
pub struct KeyringClientCryptoer {
    identity: IdentityKeypair,
    server_key: ServerPublicKey,
    session: Mutex<Option<SessionKey>>,
}

impl KeyringClientCryptoer {
    pub fn new(identity: IdentityKeypair, server_key: ServerPublicKey) -> Self {
        Self {
            identity,
            server_key,
            session: Mutex::new(None),
        }
    }
}

impl ClientCryptoer for KeyringClientCryptoer {
    fn init_client(
        &self,
        handshake: &mut Option<Handshake>,
        request: &mut RequestPlaintext,
    ) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }

        let (ephemeral, key) = client_agree(&self.server_key)?;
        let token = AuthToken {
            creation_time: now_unix(),
            ephemeral_key_id: ephemeral,
            uid: self.identity.uid(),
        };
        request.auth_token = Some(self.identity.sign_token(token)?);
        *handshake = Some(Handshake {
            version: PROTOCOL_VERSION,
            server_key_generation: self.server_key.generation,
            ephemeral_key_id: ephemeral,
        });
        *session = Some(key);

        info!(
            uid = %self.identity.uid(),
            generation = %self.server_key.generation,
            "client session key established"
        );
        Ok(())
    }

    fn session_key(&self) -> Option<SessionKey> {
        self.session.lock().clone()
    }
}

/// Installed only once authenticated, so `key` and `uid` are set together.
#[derive(Default)]
struct ServerSession {
    key: Option<SessionKey>,
    uid: Option<Uid>,
}

/// Server cryptoer backed by the shared keyring and an identity directory.
pub struct KeyringServerCryptoer {
    keyring: Arc<RwLock<ServerKeyring>>,
    directory: Arc<dyn UserDirectory>,
    freshness: Duration,
    session: Mutex<ServerSession>,
}

impl KeyringServerCryptoer {
    /// `freshness` bounds how far a token's creation time may be from now,
    /// in either direction.
    pub fn new(
        keyring: Arc<RwLock<ServerKeyring>>,
        directory: Arc<dyn UserDirectory>,
        freshness: Duration,
    ) -> Self {
        Self {
            keyring,
            directory,
            freshness,
            session: Mutex::new(ServerSession::default()),
        }
    }

    fn check_freshness(&self, token: &AuthToken) -> Result<()> {
        let skew = now_unix().saturating_sub(token.creation_time).unsigned_abs();
        if skew > self.freshness.as_secs() {
            warn!(uid = %token.uid, skew_secs = skew, "stale auth token");
            return Err(EmomError::handshake(format!(
                "auth token outside freshness window ({skew}s)"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerCryptoer for KeyringServerCryptoer {
    async fn init_server_handshake(&self, arg: &CallArg) -> Result<Option<PendingSession>> {
        let established = self.session.lock().key.is_some();
        let Some(handshake) = &arg.handshake else {
            if !established {
                return Err(EmomError::NoSessionKey);
            }
            return Ok(None);
        };

        if established {
            return Err(EmomError::handshake("session already established"));
        }
        if handshake.version != PROTOCOL_VERSION {
            return Err(EmomError::handshake(format!(
                "unsupported version {}",
                handshake.version
            )));
        }

        let key = self
            .keyring
            .read()
            .agree(handshake.server_key_generation, &handshake.ephemeral_key_id)?;

        debug!(
            generation = %handshake.server_key_generation,
            ephemeral = ?handshake.ephemeral_key_id,
            "server session key derived"
        );
        Ok(Some(PendingSession {
            key,
            ephemeral: handshake.ephemeral_key_id,
        }))
    }

    async fn check_auth_token(
        &self,
        pending: Option<PendingSession>,
        request: &RequestPlaintext,
    ) -> Result<()> {
        let Some(pending) = pending else {
            if request.auth_token.is_some() {
                return Err(EmomError::handshake(
                    "auth token on already authenticated connection",
                ));
            }
            return Ok(());
        };

        let Some(signed) = &request.auth_token else {
            return Err(EmomError::user_auth(
                "no auth token on unauthenticated connection",
            ));
        };
        if signed.token.ephemeral_key_id != pending.ephemeral {
            return Err(EmomError::handshake(
                "auth token not bound to the handshake's ephemeral key",
            ));
        }
        self.check_freshness(&signed.token)?;

        let uid = signed.token.uid;
        let key = self.directory.signing_key(uid, signed.signing_key_id).await?;
        verify_token(signed, &key)?;

        let mut session = self.session.lock();
        if session.key.is_some() {
            return Err(EmomError::handshake("session already established"));
        }
        session.key = Some(pending.key);
        session.uid = Some(uid);
        drop(session);

        info!(uid = %uid, "connection authenticated");
        Ok(())
    }

    fn session_key(&self) -> Option<SessionKey> {
        self.session.lock().key.clone()
    }

    fn authenticated_uid(&self) -> Option<Uid> {
        self.session.lock().uid
    }
}
