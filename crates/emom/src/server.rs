//! Server protocol engine.
//!
//! Every encrypted call arrives through [`Server::c`]:
//!
//! 1. Admission: wait for the call's seqno to come up
//! 2. Handshake: derive or look up the session key
//! 3. Open the request under nonce(CALL, seqno); check the auth token
//! 4. Dispatch to the registered handler
//! 5. Seal the response under nonce(REPLY, seqno)
//!
//! The admission is held until the reply is sealed, so handlers of one
//! connection run one at a time in seqno order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use emom_core::codec;
use emom_core::{CallArg, Direction, EmomError, RequestPlaintext, ResponsePlaintext, Result};
use emom_crypto::ServerCryptoer;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EmomConfig;
use crate::protocol::{split_method, ErrorWrapper, Protocol, StringErrors};
use crate::sequencer::Sequencer;
use crate::transport::{RpcService, ServedReply};

/// One server connection.
pub struct Server {
    cryptoer: Arc<dyn ServerCryptoer>,
    sequencer: Sequencer,
    protocols: RwLock<HashMap<String, Arc<Protocol>>>,
    wrapper: Arc<dyn ErrorWrapper>,
    shutdown: CancellationToken,
    call_method: String,
    notify_method: String,
}

impl Server {
    pub fn new(config: &EmomConfig, cryptoer: Arc<dyn ServerCryptoer>) -> Self {
        Self {
            cryptoer,
            sequencer: Sequencer::new(config.first_seqno, config.sequencer_timeout()),
            protocols: RwLock::new(HashMap::new()),
            wrapper: Arc::new(StringErrors),
            shutdown: CancellationToken::new(),
            call_method: config.call_method.clone(),
            notify_method: config.notify_method.clone(),
        }
    }

    pub fn with_error_wrapper(mut self, wrapper: Arc<dyn ErrorWrapper>) -> Self {
        self.wrapper = wrapper;
        self
    }

    /// Add a named handler set.
    pub fn register(&self, protocol: Protocol) -> Result<()> {
        let mut protocols = self.protocols.write();
        if protocols.contains_key(protocol.name()) {
            return Err(EmomError::AlreadyRegistered(protocol.name().to_string()));
        }
        info!(protocol = protocol.name(), "registered protocol");
        protocols.insert(protocol.name().to_string(), Arc::new(protocol));
        Ok(())
    }

    /// Cancel every call waiting on this connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn cryptoer(&self) -> &Arc<dyn ServerCryptoer> {
        &self.cryptoer
    }

    /// Encrypted call entry point.
    pub async fn c(&self, cancel: &CancellationToken, payload: &[u8]) -> Result<ServedReply> {
        let arg: CallArg = codec::decode(payload)?;
        let seqno = arg.auth_enc.seqno;

        let mut admission = self.sequencer.wait(seqno, cancel).await?;

        let request = tokio::select! {
            opened = self.open_request(&arg) => opened,
            _ = cancel.cancelled() => Err(EmomError::Cancelled),
        }
        .inspect_err(|err| warn!(seqno, error = %err, "rejected call"))?;
        admission.commit();

        let (result, error) = match self.dispatch(&request).await {
            Ok(result) => (result, None),
            Err(err) => {
                debug!(seqno, method = %request.method, error = %err, "handler failed");
                (Vec::new(), Some(self.wrapper.wrap_error(&err)?))
            }
        };

        let response = ResponsePlaintext {
            seqno: request.seqno,
            result,
            error,
        };
        let key = self.cryptoer.session_key().ok_or(EmomError::NoSessionKey)?;
        let reply = key.seal_envelope(Direction::Reply, seqno, &response)?;
        drop(admission);

        debug!(seqno, method = %request.method, "call served");
        Ok(ServedReply {
            seqno,
            payload: codec::encode(&reply)?,
        })
    }

    /// Notification entry point. Not wired: accepts and drops the payload.
    pub async fn n(&self, _cancel: &CancellationToken, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Nothing on the connection changes unless this succeeds.
    async fn open_request(&self, arg: &CallArg) -> Result<RequestPlaintext> {
        let pending = self.cryptoer.init_server_handshake(arg).await?;
        let key = match &pending {
            Some(pending) => pending.key().clone(),
            None => self.cryptoer.session_key().ok_or(EmomError::NoSessionKey)?,
        };

        let request: RequestPlaintext = key.open_envelope(Direction::Call, &arg.auth_enc)?;
        if request.seqno != arg.auth_enc.seqno {
            return Err(EmomError::decode(format!(
                "request seqno {} sealed under envelope seqno {}",
                request.seqno, arg.auth_enc.seqno
            )));
        }

        self.cryptoer.check_auth_token(pending, &request).await?;
        Ok(request)
    }

    async fn dispatch(&self, request: &RequestPlaintext) -> anyhow::Result<Vec<u8>> {
        let unknown = || EmomError::UnknownMethod(request.method.clone());
        let (protocol, method) = split_method(&request.method).ok_or_else(unknown)?;
        let handler = self
            .protocols
            .read()
            .get(protocol)
            .and_then(|p| p.handler(method))
            .ok_or_else(unknown)?;

        handler(request.args.clone()).await
    }
}

#[async_trait]
impl RpcService for Server {
    async fn serve(&self, method: &str, payload: Vec<u8>) -> Result<Option<ServedReply>> {
        if method == self.call_method {
            self.c(&self.shutdown, &payload).await.map(Some)
        } else if method == self.notify_method {
            self.n(&self.shutdown, &payload).await.map(|()| None)
        } else {
            Err(EmomError::UnknownMethod(method.to_string()))
        }
    }
}
