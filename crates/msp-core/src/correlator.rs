//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Single-flight request/response matching per command code."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Matches replies to outstanding requests.
//!
//! Each code has at most one request awaiting a reply. A reply carries no
//! sequence number, so the next frame with the requested code is taken as
//! the answer. Different codes may be in flight at the same time.
use std::collections::HashMap;
use std::sync::Arc;

use msp_common::PendingPolicy;
use msp_schema::Record;
use msp_wire::{CommandCode, Frame};
use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{MspError, Result};

/// What a resolved request receives.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The matching frame.
    pub frame: Frame,
    /// Decoded payload when the code is registered.
    pub record: Option<Record>,
}

/// Observable state of one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No request outstanding.
    Idle,
    /// A request is waiting for its reply.
    AwaitingReply,
}

struct Slot {
    id: u64,
    waiter: oneshot::Sender<Result<Reply>>,
}

#[derive(Default)]
struct State {
    slots: HashMap<CommandCode, Slot>,
    gates: HashMap<CommandCode, Arc<Semaphore>>,
    next_id: u64,
    closed: bool,
}

/// Per-code pending-request table.
pub struct Correlator {
    policy: PendingPolicy,
    state: Mutex<State>,
}

impl Correlator {
    /// Empty table using `policy` for contended codes.
    pub fn new(policy: PendingPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            state: Mutex::new(State::default()),
        })
    }

    /// Register a request for `code`.
    ///
    /// With [`PendingPolicy::FailFast`] a busy code fails with
    /// [`MspError::AlreadyPending`]; with [`PendingPolicy::Queue`] this waits
    /// for the slot. Callers bound the wait with their own deadline.
    pub async fn begin(self: &Arc<Self>, code: CommandCode) -> Result<PendingRequest> {
        let permit = match self.policy {
            PendingPolicy::FailFast => None,
            PendingPolicy::Queue => {
                let gate = {
                    let mut state = self.state.lock();
                    if state.closed {
                        return Err(MspError::TransportClosed);
                    }
                    Arc::clone(
                        state
                            .gates
                            .entry(code)
                            .or_insert_with(|| Arc::new(Semaphore::new(1))),
                    )
                };
                let permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|_| MspError::TransportClosed)?;
                Some(permit)
            }
        };

        let mut state = self.state.lock();
        if state.closed {
            return Err(MspError::TransportClosed);
        }
        if state.slots.contains_key(&code) {
            return Err(MspError::AlreadyPending { code });
        }
        let id = state.next_id;
        state.next_id += 1;
        let (waiter, reply) = oneshot::channel();
        state.slots.insert(code, Slot { id, waiter });
        trace!(code = code.get(), id, "request registered");
        Ok(PendingRequest {
            correlator: Arc::clone(self),
            code,
            id,
            submitted_at: Instant::now(),
            reply,
            _permit: permit,
        })
    }

    /// Hand `reply` to the request waiting on `code`. Returns whether one was
    /// waiting; unsolicited replies are left to the caller.
    pub fn resolve(&self, code: CommandCode, reply: Result<Reply>) -> bool {
        let slot = self.state.lock().slots.remove(&code);
        match slot {
            Some(slot) => {
                trace!(code = code.get(), id = slot.id, "request resolved");
                slot.waiter.send(reply).is_ok()
            }
            None => false,
        }
    }

    /// Fail every waiter with [`MspError::TransportClosed`] and refuse new
    /// registrations.
    pub fn close(&self) {
        let (slots, gates) = {
            let mut state = self.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.slots),
                std::mem::take(&mut state.gates),
            )
        };
        if !slots.is_empty() {
            debug!(pending = slots.len(), "failing pending requests");
        }
        for (_, slot) in slots {
            let _ = slot.waiter.send(Err(MspError::TransportClosed));
        }
        for gate in gates.values() {
            gate.close();
        }
    }

    /// State of `code`.
    pub fn state(&self, code: CommandCode) -> SlotState {
        if self.state.lock().slots.contains_key(&code) {
            SlotState::AwaitingReply
        } else {
            SlotState::Idle
        }
    }

    /// Number of codes awaiting a reply.
    pub fn pending(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn release(&self, code: CommandCode, id: u64) {
        let mut state = self.state.lock();
        if state.slots.get(&code).is_some_and(|slot| slot.id == id) {
            state.slots.remove(&code);
            debug!(code = code.get(), id, "pending request abandoned");
        }
    }
}

/// Registration of one outstanding request. Dropping it before the reply
/// arrives (timeout, cancellation) returns the code to [`SlotState::Idle`];
/// a reply arriving afterwards finds no waiter.
pub struct PendingRequest {
    correlator: Arc<Correlator>,
    code: CommandCode,
    id: u64,
    submitted_at: Instant,
    reply: oneshot::Receiver<Result<Reply>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PendingRequest {
    /// Code this request waits on.
    pub fn code(&self) -> CommandCode {
        self.code
    }

    /// When the slot was taken.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Wait for the reply.
    pub async fn wait(mut self) -> Result<Reply> {
        match (&mut self.reply).await {
            Ok(reply) => reply,
            Err(_) => Err(MspError::TransportClosed),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.correlator.release(self.code, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use msp_wire::{Direction, ProtocolVersion};

    use super::*;

    fn reply(code: u16, payload: &'static [u8]) -> Result<Reply> {
        Ok(Reply {
            frame: Frame::new(ProtocolVersion::V1, Direction::Response, CommandCode(code), payload),
            record: None,
        })
    }

    #[tokio::test]
    async fn fail_fast_rejects_second_request_for_same_code() {
        let correlator = Correlator::new(PendingPolicy::FailFast);
        let first = correlator.begin(CommandCode(106)).await.expect("first");
        assert_eq!(correlator.state(CommandCode(106)), SlotState::AwaitingReply);
        assert!(matches!(
            correlator.begin(CommandCode(106)).await,
            Err(MspError::AlreadyPending { code: CommandCode(106) })
        ));
        // Other codes are independent.
        let _other = correlator.begin(CommandCode(108)).await.expect("pipelined");
        assert_eq!(correlator.pending(), 2);

        assert!(correlator.resolve(CommandCode(106), reply(106, &[1])));
        let got = first.wait().await.expect("reply");
        assert_eq!(&got.frame.payload[..], &[1]);
        assert_eq!(correlator.state(CommandCode(106)), SlotState::Idle);
    }

    #[tokio::test]
    async fn dropped_guard_returns_slot_to_idle() {
        let correlator = Correlator::new(PendingPolicy::FailFast);
        let pending = correlator.begin(CommandCode(1)).await.unwrap();
        drop(pending);
        assert_eq!(correlator.state(CommandCode(1)), SlotState::Idle);
        assert!(!correlator.resolve(CommandCode(1), reply(1, &[])));
        assert!(correlator.begin(CommandCode(1)).await.is_ok());
    }

    #[tokio::test]
    async fn stale_guard_does_not_release_a_newer_request() {
        let correlator = Correlator::new(PendingPolicy::FailFast);
        let first = correlator.begin(CommandCode(5)).await.unwrap();
        correlator.resolve(CommandCode(5), reply(5, &[]));
        let _second = correlator.begin(CommandCode(5)).await.unwrap();
        drop(first);
        assert_eq!(correlator.state(CommandCode(5)), SlotState::AwaitingReply);
    }

    #[tokio::test]
    async fn queue_policy_waits_for_the_slot() {
        let correlator = Correlator::new(PendingPolicy::Queue);
        let first = correlator.begin(CommandCode(106)).await.unwrap();

        let queued = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                let pending = correlator.begin(CommandCode(106)).await?;
                pending.wait().await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queued.is_finished());

        correlator.resolve(CommandCode(106), reply(106, &[1]));
        first.wait().await.unwrap();

        // The queued request now owns the slot.
        while correlator.state(CommandCode(106)) == SlotState::Idle {
            tokio::task::yield_now().await;
        }
        correlator.resolve(CommandCode(106), reply(106, &[2]));
        let second = queued.await.unwrap().unwrap();
        assert_eq!(&second.frame.payload[..], &[2]);
    }

    #[tokio::test]
    async fn close_fails_waiters_and_new_requests() {
        let correlator = Correlator::new(PendingPolicy::Queue);
        let first = correlator.begin(CommandCode(2)).await.unwrap();
        let queued = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.begin(CommandCode(2)).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        correlator.close();
        assert!(matches!(first.wait().await, Err(MspError::TransportClosed)));
        assert!(matches!(queued.await.unwrap(), Err(MspError::TransportClosed)));
        assert!(matches!(
            correlator.begin(CommandCode(3)).await,
            Err(MspError::TransportClosed)
        ));
        assert!(correlator.is_closed());
    }
}
