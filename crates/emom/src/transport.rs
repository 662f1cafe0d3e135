//! Contract with the framed RPC transport emom rides on.
//!
//! The transport only moves opaque byte payloads and matches replies to
//! calls. emom needs two hooks from it on the client side:
//!
//! ```text
//! call(method, arg, notifier)
//!   |-- dispatched under transport seqno T ---> notifier(T)
//!   |-- reply frame (server seqno S) matched -> reply_sequencer.on_reply(S, T)
//!   '-- returns reply payload
//! ```
//!
//! On the server side the transport hosts an [`RpcService`] and stamps the
//! seqno of each [`ServedReply`] into its reply frame as the server seqno.

use std::sync::Arc;

use async_trait::async_trait;
use emom_core::{Result, TransportSeqno};

/// Fired once, with the transport seqno, when a call is actually dispatched.
pub type SendNotifier = Box<dyn FnOnce(TransportSeqno) + Send>;

/// Receives (server seqno, client transport seqno) for every reply the
/// transport matches to a call, before that call's reply is returned.
pub trait ReplySequencer: Send + Sync {
    fn on_reply(&self, server_seqno: TransportSeqno, client_seqno: TransportSeqno);
}

/// Client end of the framed transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, method: &str, arg: Vec<u8>, notifier: SendNotifier) -> Result<Vec<u8>>;

    fn install_reply_sequencer(&self, sequencer: Arc<dyn ReplySequencer>);
}

/// A reply payload plus the seqno the transport frames it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedReply {
    pub seqno: TransportSeqno,
    pub payload: Vec<u8>,
}

/// Server end: something the transport dispatches incoming calls to.
#[async_trait]
pub trait RpcService: Send + Sync {
    /// `None` for methods that send no reply.
    async fn serve(&self, method: &str, payload: Vec<u8>) -> Result<Option<ServedReply>>;
}
