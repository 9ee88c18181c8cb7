//! Single-flight gate around the host's one-time startup.
//!
//! The first caller that finds the bridge Uninitialized becomes the leader:
//! it moves the lifecycle to Initializing and owns an [`InitPublisher`].
//! Everyone arriving while that attempt runs follows it through a watch
//! channel and receives the same outcome.
//!
//! On failure the lifecycle returns to Uninitialized so the next caller
//! starts a fresh attempt.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::watch;

use super::lifecycle::{BridgeState, Lifecycle};
use crate::error::{BridgeError, BridgeResult, LockResultExt};

/// Outcome slot of one attempt; `None` while it is still running.
type AttemptOutcome = Option<BridgeResult<()>>;

type AttemptSlot = Arc<Mutex<Option<watch::Receiver<AttemptOutcome>>>>;

/// What a caller entering the gate has to do.
pub(crate) enum GateTicket {
    Ready,
    Terminated,
    /// An attempt is in flight; wait for its outcome.
    Follow(watch::Receiver<AttemptOutcome>),
    /// This caller started the attempt and must publish its outcome.
    Lead {
        publisher: InitPublisher,
        outcome: watch::Receiver<AttemptOutcome>,
    },
}

pub(crate) struct InitGate {
    lifecycle: Arc<Lifecycle>,
    attempt: AttemptSlot,
}

impl InitGate {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            lifecycle,
            attempt: Arc::new(Mutex::new(None)),
        }
    }

    /// Check readiness and join or start an attempt.
    pub(crate) fn enter(&self) -> GateTicket {
        let mut slot = self.attempt.lock().recover_poison("InitGate::enter");

        match (self.lifecycle.state(), slot.as_ref()) {
            (BridgeState::Ready, _) => GateTicket::Ready,
            (BridgeState::Terminated, _) => GateTicket::Terminated,
            (_, Some(outcome)) => GateTicket::Follow(outcome.clone()),
            (_, None) => {
                self.lifecycle.begin_initializing();
                let (sender, outcome) = watch::channel(None);
                *slot = Some(outcome.clone());
                debug!(target: "workbridge::bridge::init", "Starting host initialization");
                GateTicket::Lead {
                    publisher: InitPublisher {
                        lifecycle: self.lifecycle.clone(),
                        attempt: self.attempt.clone(),
                        sender: Some(sender),
                    },
                    outcome,
                }
            }
        }
    }

    /// Wait for an attempt's outcome.
    pub(crate) async fn wait(mut outcome: watch::Receiver<AttemptOutcome>) -> BridgeResult<()> {
        match outcome.wait_for(Option::is_some).await {
            Ok(published) => match &*published {
                Some(result) => result.clone(),
                None => Err(BridgeError::initialization_failed("no outcome published")),
            },
            Err(_) => Err(BridgeError::initialization_failed(
                "initialization abandoned",
            )),
        }
    }
}

/// Leader side of an attempt.
///
/// Dropping it unpublished fails the attempt, so followers never wait on a
/// leader that went away.
pub(crate) struct InitPublisher {
    lifecycle: Arc<Lifecycle>,
    attempt: AttemptSlot,
    sender: Option<watch::Sender<AttemptOutcome>>,
}

impl InitPublisher {
    /// Apply the outcome to the lifecycle, then release every waiter.
    pub(crate) fn publish(mut self, result: BridgeResult<()>) {
        self.finish(result);
    }

    fn finish(&mut self, result: BridgeResult<()>) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        {
            let mut slot = self.attempt.lock().recover_poison("InitPublisher::finish");
            match &result {
                Ok(()) => {
                    self.lifecycle.mark_ready();
                    debug!(target: "workbridge::bridge::init", "Host initialization complete");
                }
                Err(e) => {
                    self.lifecycle.reset_after_failure();
                    warn!(
                        target: "workbridge::bridge::init",
                        "Host initialization failed: {}",
                        e
                    );
                }
            }
            // Cleared under the same lock as the state change so a caller
            // never sees Uninitialized next to a stale attempt
            slot.take();
        }

        sender.send_replace(Some(result));
    }
}

impl Drop for InitPublisher {
    fn drop(&mut self) {
        self.finish(Err(BridgeError::initialization_failed(
            "initialization abandoned",
        )));
    }
}
