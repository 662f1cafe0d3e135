//! Client-side sequence correlation and the connection latch.
//!
//! The transport reports two things about every call: the transport seqno
//! it was dispatched under (send notifier) and, once a reply is matched to
//! it, the server seqno stamped on that reply (reply sequencer). The client
//! keeps one slot per dispatched call so it can check, before trusting a
//! reply, that the ciphertext it got is the one the server sent for that
//! call.
//!
//! Any inconsistency here means the transport or a relay cannot be trusted,
//! so it is latched: every later call on the connection fails with it.

use std::collections::HashMap;
use std::sync::Arc;

use emom_core::{EmomError, Result, TransportSeqno};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::transport::ReplySequencer;

/// Set-once fatal error for a connection.
#[derive(Default)]
pub struct Latch {
    error: Mutex<Option<EmomError>>,
}

impl Latch {
    pub fn check(&self) -> Result<()> {
        match &*self.error.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Latch `err` unless something is latched already. Returns the error
    /// the connection is now poisoned with.
    pub fn latch(&self, err: EmomError) -> EmomError {
        let mut slot = self.error.lock();
        match &*slot {
            Some(existing) => existing.clone(),
            None => {
                warn!(error = %err, "latched fatal connection error");
                *slot = Some(err.clone());
                err
            }
        }
    }

    pub fn get(&self) -> Option<EmomError> {
        self.error.lock().clone()
    }
}

enum Slot {
    Dispatched,
    Replied(TransportSeqno),
    /// The caller gave up; its one reply report is still expected.
    Abandoned,
}

#[derive(Default)]
struct Table {
    slots: HashMap<TransportSeqno, Slot>,
    last_dispatched: Option<TransportSeqno>,
}

/// Transport seqno → server seqno map for calls in flight.
pub struct Correlator {
    table: Mutex<Table>,
    latch: Arc<Latch>,
}

impl Correlator {
    pub fn new(latch: Arc<Latch>) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            latch,
        }
    }

    /// Record a dispatch. Transport seqnos must be strictly increasing in
    /// issuance order.
    pub fn dispatched(&self, transport_seqno: TransportSeqno) {
        let mut table = self.table.lock();
        if table.last_dispatched.is_some_and(|last| transport_seqno <= last) {
            drop(table);
            self.latch.latch(EmomError::client_sequence(format!(
                "transport dispatched seqno {transport_seqno} out of issuance order"
            )));
            return;
        }
        table.last_dispatched = Some(transport_seqno);
        table.slots.insert(transport_seqno, Slot::Dispatched);
    }

    /// Remove and return the server seqno recorded for a call.
    ///
    /// `None` if no reply sequence was ever reported for it.
    pub fn take(&self, transport_seqno: TransportSeqno) -> Option<TransportSeqno> {
        match self.table.lock().slots.remove(&transport_seqno) {
            Some(Slot::Replied(server_seqno)) => Some(server_seqno),
            _ => None,
        }
    }

    /// Stop waiting on a call. A reply already reported for it is dropped;
    /// otherwise the slot stays as a tombstone that absorbs the late report.
    pub fn forget(&self, transport_seqno: TransportSeqno) {
        let mut table = self.table.lock();
        if matches!(table.slots.get(&transport_seqno), Some(Slot::Dispatched)) {
            table.slots.insert(transport_seqno, Slot::Abandoned);
        } else {
            table.slots.remove(&transport_seqno);
        }
    }
}

impl ReplySequencer for Correlator {
    fn on_reply(&self, server_seqno: TransportSeqno, client_seqno: TransportSeqno) {
        let mut table = self.table.lock();
        let problem = match table.slots.remove(&client_seqno) {
            Some(Slot::Dispatched) => {
                table
                    .slots
                    .insert(client_seqno, Slot::Replied(server_seqno));
                return;
            }
            Some(Slot::Abandoned) => {
                debug!(client_seqno, server_seqno, "reply to abandoned call dropped");
                return;
            }
            Some(Slot::Replied(_)) => "second reply sequence",
            None => "reply sequence for unknown call",
        };
        drop(table);
        self.latch.latch(EmomError::server_sequence(format!(
            "{problem}: transport seqno {client_seqno}, server seqno {server_seqno}"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator() -> (Arc<Latch>, Correlator) {
        let latch = Arc::new(Latch::default());
        (latch.clone(), Correlator::new(latch))
    }

    #[test]
    fn test_reply_correlates_once() {
        let (latch, c) = correlator();
        c.dispatched(5);
        c.on_reply(11, 5);

        assert_eq!(c.take(5), Some(11));
        assert_eq!(c.take(5), None);
        assert!(latch.check().is_ok());
    }

    #[test]
    fn test_missing_reply_sequence() {
        let (_, c) = correlator();
        c.dispatched(5);
        assert_eq!(c.take(5), None);
    }

    #[test]
    fn test_duplicate_reply_sequence_latches() {
        let (latch, c) = correlator();
        c.dispatched(5);
        c.on_reply(11, 5);
        c.on_reply(12, 5);

        assert!(matches!(latch.check(), Err(EmomError::ServerSequence(_))));
    }

    #[test]
    fn test_unknown_call_latches() {
        let (latch, c) = correlator();
        c.on_reply(1, 99);
        assert!(matches!(latch.get(), Some(EmomError::ServerSequence(_))));
    }

    #[test]
    fn test_reply_after_forget_is_absorbed_once() {
        let (latch, c) = correlator();
        c.dispatched(5);
        c.forget(5);
        c.on_reply(1, 5);
        assert!(latch.check().is_ok());
        assert_eq!(c.take(5), None);

        c.on_reply(1, 5);
        assert!(matches!(latch.get(), Some(EmomError::ServerSequence(_))));
    }

    #[test]
    fn test_forget_after_reply_clears_slot() {
        let (latch, c) = correlator();
        c.dispatched(5);
        c.on_reply(1, 5);
        c.forget(5);
        assert_eq!(c.take(5), None);
        assert!(latch.check().is_ok());
    }

    #[test]
    fn test_dispatch_order_regression_latches() {
        let (latch, c) = correlator();
        c.dispatched(6);
        c.dispatched(5);
        assert!(matches!(latch.get(), Some(EmomError::ClientSequence(_))));
    }

    #[test]
    fn test_first_latched_error_wins() {
        let latch = Latch::default();
        latch.latch(EmomError::server_sequence("first"));
        let returned = latch.latch(EmomError::client_sequence("second"));

        assert_eq!(returned, EmomError::server_sequence("first"));
        assert_eq!(latch.check(), Err(EmomError::server_sequence("first")));
    }
}
