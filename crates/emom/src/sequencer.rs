//! Server-side admission gate.
//!
//! Calls may reach the protocol layer in any order; the sequencer admits
//! them one at a time in strictly ascending seqno order.
//!
//! # Design
//!
//! - `next` is the only admissible seqno; at most one call holds it
//! - Later seqnos park a oneshot in an ordered waiter registry
//! - An [`Admission`] is exclusive. Dropping it after [`Admission::commit`]
//!   advances `next` and wakes the waiter for the new value; dropping it
//!   uncommitted frees the slot without advancing
//! - Seqnos below `next`, or already admitted or waiting, are rejected
//!   without blocking
//! - A waiter that goes away withdraws its registration; if its turn was
//!   already granted, the slot passes to the next waiter

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use emom_core::{EmomError, Result, Seqno};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct State {
    next: Seqno,
    admitted: Option<Seqno>,
    waiters: BTreeMap<Seqno, oneshot::Sender<()>>,
}

impl State {
    /// Hand the slot to whoever waits for `next`, if anyone.
    fn grant_next(&mut self) {
        if self.admitted.is_some() {
            return;
        }
        let next = self.next;
        if let Some(tx) = self.waiters.remove(&next) {
            if tx.send(()).is_ok() {
                self.admitted = Some(next);
            }
        }
    }
}

/// Strict ascending-order admission gate for one connection.
pub struct Sequencer {
    state: Arc<Mutex<State>>,
    timeout: Duration,
}

impl Sequencer {
    pub fn new(first: Seqno, timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next: first,
                admitted: None,
                waiters: BTreeMap::new(),
            })),
            timeout,
        }
    }

    /// Next seqno the gate will admit.
    pub fn expected(&self) -> Seqno {
        self.state.lock().next
    }

    /// Block until `seqno` is admissible.
    ///
    /// # Errors
    /// - [`EmomError::Sequencing`] immediately for a replayed or duplicate seqno
    /// - [`EmomError::SequencerTimeout`] if the turn does not come in time
    /// - [`EmomError::Cancelled`] if `cancel` fires first
    pub async fn wait(&self, seqno: Seqno, cancel: &CancellationToken) -> Result<Admission> {
        let rx = {
            let mut state = self.state.lock();
            let duplicate = state.admitted == Some(seqno) || state.waiters.contains_key(&seqno);
            if seqno < state.next || duplicate {
                warn!(seqno, expected = state.next, "rejected inadmissible seqno");
                return Err(EmomError::Sequencing {
                    seqno,
                    expected: state.next,
                });
            }

            if seqno == state.next && state.admitted.is_none() {
                state.admitted = Some(seqno);
                return Ok(self.admission(seqno));
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.insert(seqno, tx);
            debug!(seqno, expected = state.next, "waiting for admission");
            rx
        };
        // Owns the registration from here on, including a grant that lands
        // after this future stops being polled.
        let mut pending = PendingWait {
            state: self.state.clone(),
            seqno,
            armed: true,
        };

        let failure = tokio::select! {
            granted = rx => match granted {
                Ok(()) => return Ok(pending.into_admission()),
                Err(_) => EmomError::Cancelled,
            },
            _ = tokio::time::sleep(self.timeout) => EmomError::SequencerTimeout { seqno },
            _ = cancel.cancelled() => EmomError::Cancelled,
        };

        let mut state = self.state.lock();
        if state.waiters.remove(&seqno).is_some() {
            drop(state);
            pending.armed = false;
            warn!(seqno, error = %failure, "admission wait abandoned");
            return Err(failure);
        }
        // Granted between the timer firing and taking the lock.
        drop(state);
        Ok(pending.into_admission())
    }

    fn admission(&self, seqno: Seqno) -> Admission {
        Admission {
            state: self.state.clone(),
            seqno,
            committed: false,
        }
    }
}

/// A registered waiter. Dropping it withdraws the registration, or hands the
/// slot on if it was already granted.
struct PendingWait {
    state: Arc<Mutex<State>>,
    seqno: Seqno,
    armed: bool,
}

impl PendingWait {
    fn into_admission(mut self) -> Admission {
        self.armed = false;
        Admission {
            state: self.state.clone(),
            seqno: self.seqno,
            committed: false,
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        if state.waiters.remove(&self.seqno).is_some() {
            return;
        }
        if state.admitted == Some(self.seqno) {
            debug!(seqno = self.seqno, "granted admission never taken");
            state.admitted = None;
            state.grant_next();
        }
    }
}

/// Exclusive right to process one seqno.
#[must_use = "dropping an admission releases the slot"]
pub struct Admission {
    state: Arc<Mutex<State>>,
    seqno: Seqno,
    committed: bool,
}

impl Admission {
    pub fn seqno(&self) -> Seqno {
        self.seqno
    }

    /// Mark the seqno as consumed. The gate advances when this admission
    /// is dropped.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.admitted != Some(self.seqno) {
            return;
        }
        state.admitted = None;
        if self.committed {
            state.next = self.seqno.saturating_add(1);
        }
        state.grant_next();
    }
}
