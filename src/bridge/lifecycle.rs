//! Bridge lifecycle state machine.

use tokio::sync::watch;

/// State of a bridge instance.
///
/// Transitions:
/// - Uninitialized -> Initializing (first caller enters the init gate)
/// - Initializing -> Ready (`ready` message or startup success)
/// - Uninitialized -> Ready (host announced `ready` before anyone asked)
/// - Initializing -> Uninitialized (startup failed; next call retries)
/// - any -> Terminated (close or transport failure; terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No startup attempted yet, or the last attempt failed
    Uninitialized,
    /// Startup request in flight
    Initializing,
    /// Host finished its one-time startup
    Ready,
    /// Bridge closed (terminal state)
    Terminated,
}

/// Shared lifecycle slot.
///
/// Backed by a watch channel so the startup attempt can await the `ready`
/// transition made by the reader task.
pub(crate) struct Lifecycle {
    state: watch::Sender<BridgeState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(BridgeState::Uninitialized);
        Self { state }
    }

    pub(crate) fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state() == BridgeState::Terminated
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Uninitialized -> Initializing. Returns whether the transition happened.
    pub(crate) fn begin_initializing(&self) -> bool {
        self.transition(|s| {
            (s == BridgeState::Uninitialized).then_some(BridgeState::Initializing)
        })
    }

    /// Uninitialized/Initializing -> Ready. Returns `false` when already
    /// Ready (duplicate `ready`) or Terminated.
    pub(crate) fn mark_ready(&self) -> bool {
        self.transition(|s| match s {
            BridgeState::Uninitialized | BridgeState::Initializing => Some(BridgeState::Ready),
            BridgeState::Ready | BridgeState::Terminated => None,
        })
    }

    /// Initializing -> Uninitialized after a failed startup.
    pub(crate) fn reset_after_failure(&self) -> bool {
        self.transition(|s| {
            (s == BridgeState::Initializing).then_some(BridgeState::Uninitialized)
        })
    }

    /// Any -> Terminated. Returns `false` if already terminated.
    pub(crate) fn terminate(&self) -> bool {
        self.transition(|s| (s != BridgeState::Terminated).then_some(BridgeState::Terminated))
    }

    fn transition(&self, next: impl FnOnce(BridgeState) -> Option<BridgeState>) -> bool {
        self.state.send_if_modified(|state| match next(*state) {
            Some(new_state) => {
                log::debug!(
                    target: "workbridge::bridge",
                    "Bridge state {:?} -> {:?}",
                    *state,
                    new_state
                );
                *state = new_state;
                true
            }
            None => false,
        })
    }
}
