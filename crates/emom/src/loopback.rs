//! In-process transport: client and server in one process, no framing.
//!
//! Assigns transport seqnos from a counter, fires the send notifier before
//! handing the payload to the service, and reports the served reply's seqno
//! to the reply sequencer before returning it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use emom_core::{EmomError, Result, TransportSeqno};
use parking_lot::RwLock;
use tracing::debug;

use crate::transport::{ReplySequencer, RpcService, SendNotifier, Transport};

pub struct LoopbackTransport {
    service: Arc<dyn RpcService>,
    next_seqno: AtomicU64,
    reply_sequencer: RwLock<Option<Arc<dyn ReplySequencer>>>,
}

impl LoopbackTransport {
    pub fn new(service: Arc<dyn RpcService>) -> Self {
        Self::with_first_seqno(service, 1)
    }

    pub fn with_first_seqno(service: Arc<dyn RpcService>, first: TransportSeqno) -> Self {
        Self {
            service,
            next_seqno: AtomicU64::new(first),
            reply_sequencer: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, method: &str, arg: Vec<u8>, notifier: SendNotifier) -> Result<Vec<u8>> {
        let transport_seqno = self.next_seqno.fetch_add(1, Ordering::SeqCst);
        notifier(transport_seqno);
        debug!(transport_seqno, method, "loopback dispatch");

        let reply = self
            .service
            .serve(method, arg)
            .await?
            .ok_or_else(|| EmomError::transport(format!("{method} sent no reply")))?;

        let sequencer = self.reply_sequencer.read().clone();
        if let Some(sequencer) = sequencer {
            sequencer.on_reply(reply.seqno, transport_seqno);
        }
        Ok(reply.payload)
    }

    fn install_reply_sequencer(&self, sequencer: Arc<dyn ReplySequencer>) {
        *self.reply_sequencer.write() = Some(sequencer);
    }
}
