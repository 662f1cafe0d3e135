//! Client protocol engine.
//!
//! # Call Flow
//!
//! ```text
//!   issuance lock ──────────────────────────────┐
//!   | assign seqno S, attach handshake/auth      |
//!   | seal RequestPlaintext under nonce(CALL, S) |
//!   | spawn transport.call(CallArg)              |
//!   | wait for send notifier -> transport seqno T|
//!   └────────────────────────────────────────────┘  next call may start here
//!   await reply AuthEnc
//!   correlate T -> server seqno, must equal AuthEnc.seqno   (latched on failure)
//!   open under nonce(REPLY, AuthEnc.seqno)
//!   ResponsePlaintext.seqno must equal S                      (WrongReply)
//! ```
//!
//! Holding the issuance lock until the transport has dispatched the call
//! keeps transport dispatch order equal to seqno order while still letting
//! calls pipeline.

use std::sync::Arc;

use emom_core::codec;
use emom_core::{
    AuthEnc, CallArg, Direction, EmomError, RequestPlaintext, ResponsePlaintext, Result, Seqno,
    TransportSeqno,
};
use emom_crypto::ClientCryptoer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EmomConfig;
use crate::correlation::{Correlator, Latch};
use crate::protocol::{ErrorUnwrapper, StringErrors};
use crate::transport::{SendNotifier, Transport};

/// One client connection: seqno counter, correlation map, session, latch.
pub struct Client {
    transport: Arc<dyn Transport>,
    cryptoer: Arc<dyn ClientCryptoer>,
    /// Next seqno to assign.
    issuance: Mutex<Seqno>,
    correlator: Arc<Correlator>,
    latch: Arc<Latch>,
    unwrapper: Arc<dyn ErrorUnwrapper>,
    call_method: String,
}

/// A call the transport has accepted.
struct Dispatched {
    seqno: Seqno,
    transport_seqno: TransportSeqno,
    reply: JoinHandle<Result<Vec<u8>>>,
}

impl Client {
    /// Create a client and install its reply sequencer on the transport.
    pub fn new(
        config: &EmomConfig,
        transport: Arc<dyn Transport>,
        cryptoer: Arc<dyn ClientCryptoer>,
    ) -> Self {
        let latch = Arc::new(Latch::default());
        let correlator = Arc::new(Correlator::new(latch.clone()));
        transport.install_reply_sequencer(correlator.clone());

        Self {
            transport,
            cryptoer,
            issuance: Mutex::new(config.first_seqno),
            correlator,
            latch,
            unwrapper: Arc::new(StringErrors),
            call_method: config.call_method.clone(),
        }
    }

    pub fn with_error_unwrapper(mut self, unwrapper: Arc<dyn ErrorUnwrapper>) -> Self {
        self.unwrapper = unwrapper;
        self
    }

    /// The fatal error this connection is poisoned with, if any.
    pub fn latched_error(&self) -> Option<EmomError> {
        self.latch.get()
    }

    /// Call `method` with `arg` and decode its result.
    pub async fn call<A, R>(&self, cancel: &CancellationToken, method: &str, arg: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.latch.check()?;
        let args = codec::encode(arg)?;

        let dispatched = self.dispatch(cancel, method, args).await?;
        let seqno = dispatched.seqno;
        let response = self.await_reply(cancel, dispatched).await?;

        if response.seqno != seqno {
            warn!(expected = seqno, got = response.seqno, method, "wrong reply");
            return Err(EmomError::WrongReply {
                expected: seqno,
                got: response.seqno,
            });
        }
        if let Some(encoded) = response.error {
            return Err(self.unwrapper.unwrap_error(&encoded));
        }
        codec::decode(&response.result)
    }

    /// Fire-and-forget call. Not wired: succeeds without sending anything.
    pub async fn notify<A>(&self, _cancel: &CancellationToken, method: &str, _arg: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        debug!(method, "notify is a no-op");
        Ok(())
    }

    /// Issue one call under the issuance lock and wait until the transport
    /// has dispatched it.
    async fn dispatch(
        &self,
        cancel: &CancellationToken,
        method: &str,
        args: Vec<u8>,
    ) -> Result<Dispatched> {
        let mut next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmomError::Cancelled),
            guard = self.issuance.lock() => guard,
        };
        self.latch.check()?;

        let seqno = *next;
        let mut request = RequestPlaintext {
            seqno,
            method: method.to_string(),
            args,
            auth_token: None,
        };
        let mut handshake = None;
        self.cryptoer.init_client(&mut handshake, &mut request)?;
        let key = self.cryptoer.session_key().ok_or(EmomError::NoSessionKey)?;

        let auth_enc = key.seal_envelope(Direction::Call, seqno, &request)?;
        let payload = codec::encode(&CallArg {
            handshake,
            auth_enc,
        })?;
        // The ciphertext exists from here on; never seal under this seqno again.
        *next += 1;

        let (sent_tx, sent_rx) = oneshot::channel();
        let correlator = self.correlator.clone();
        let notifier: SendNotifier = Box::new(move |transport_seqno| {
            correlator.dispatched(transport_seqno);
            let _ = sent_tx.send(transport_seqno);
        });

        let transport = self.transport.clone();
        let call_method = self.call_method.clone();
        let mut reply =
            tokio::spawn(async move { transport.call(&call_method, payload, notifier).await });

        let transport_seqno = tokio::select! {
            sent = sent_rx => match sent {
                Ok(transport_seqno) => transport_seqno,
                Err(_) => {
                    // The notifier was dropped unfired: the transport gave up
                    // before dispatching.
                    let err = match (&mut reply).await {
                        Ok(Err(err)) => err,
                        Ok(Ok(_)) => EmomError::transport("reply without send notification"),
                        Err(join) => EmomError::transport(join),
                    };
                    warn!(seqno, method, error = %err, "call failed before dispatch");
                    return Err(err);
                }
            },
            _ = cancel.cancelled() => {
                reply.abort();
                return Err(EmomError::Cancelled);
            }
        };
        drop(next);

        if let Err(err) = self.latch.check() {
            reply.abort();
            self.correlator.forget(transport_seqno);
            return Err(err);
        }

        debug!(seqno, transport_seqno, method, "call dispatched");
        Ok(Dispatched {
            seqno,
            transport_seqno,
            reply,
        })
    }

    /// Wait for the reply, correlate it, and open it.
    async fn await_reply(
        &self,
        cancel: &CancellationToken,
        dispatched: Dispatched,
    ) -> Result<ResponsePlaintext> {
        let Dispatched {
            seqno,
            transport_seqno,
            mut reply,
        } = dispatched;

        let joined = tokio::select! {
            joined = &mut reply => joined,
            _ = cancel.cancelled() => {
                reply.abort();
                self.correlator.forget(transport_seqno);
                return Err(EmomError::Cancelled);
            }
        };
        let payload = match joined {
            Ok(Ok(payload)) => payload,
            Ok(Err(err)) => {
                self.correlator.forget(transport_seqno);
                return Err(err);
            }
            Err(join) => {
                self.correlator.forget(transport_seqno);
                return Err(EmomError::transport(join));
            }
        };

        let server_seqno = self.correlator.take(transport_seqno);
        self.latch.check()?;
        let envelope: AuthEnc = codec::decode(&payload)?;
        self.check_correlation(transport_seqno, server_seqno, &envelope)?;

        let key = self.cryptoer.session_key().ok_or(EmomError::NoSessionKey)?;
        let response: ResponsePlaintext = key.open_envelope(Direction::Reply, &envelope)?;

        debug!(seqno, transport_seqno, "reply opened");
        Ok(response)
    }

    fn check_correlation(
        &self,
        transport_seqno: TransportSeqno,
        server_seqno: Option<TransportSeqno>,
        envelope: &AuthEnc,
    ) -> Result<()> {
        let err = match server_seqno {
            Some(server_seqno) if server_seqno == envelope.seqno => return Ok(()),
            Some(server_seqno) => EmomError::server_sequence(format!(
                "reply to transport seqno {transport_seqno} carries seqno {}, \
                 server sent seqno {server_seqno}",
                envelope.seqno
            )),
            None => EmomError::server_sequence(format!(
                "no reply sequence reported for transport seqno {transport_seqno}"
            )),
        };
        Err(self.latch.latch(err))
    }
}
