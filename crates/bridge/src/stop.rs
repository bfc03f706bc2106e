use crate::control::{SessionControl, SessionState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop flag shared by the producer, the consumer and signal handlers.
///
/// Cloning shares the same flag. In multi-process mode the flag is mirrored to a
/// [`SessionControl`] byte so that a stop in one process reaches the other.
/// A `Stopping` state already present when the signal attaches belongs to a
/// finished session and is ignored until the session owner resets it.
#[derive(Clone, Default)]
pub struct StopSignal {
    local: Arc<AtomicBool>,
    session: Option<Arc<SessionControl>>,
    stale_generation: Option<u64>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Arc<SessionControl>) -> Self {
        let stale_generation = match session.snapshot() {
            (generation, SessionState::Stopping) => Some(generation),
            (_, SessionState::Running) => None,
        };
        Self {
            local: Arc::new(AtomicBool::new(false)),
            session: Some(session),
            stale_generation,
        }
    }

    pub fn is_set(&self) -> bool {
        if self.local.load(Ordering::Acquire) {
            return true;
        }
        let Some(session) = &self.session else {
            return false;
        };
        match session.snapshot() {
            (generation, SessionState::Stopping) if Some(generation) != self.stale_generation => {
                self.local.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Set the flag. Idempotent.
    pub fn set(&self) {
        self.local.store(true, Ordering::Release);
        if let Some(session) = &self.session {
            session.request_stop();
        }
    }

    /// Raw flag, for registration with `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.local)
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("set", &self.local.load(Ordering::Relaxed))
            .field("shared", &self.session.is_some())
            .field("stale_generation", &self.stale_generation)
            .finish()
    }
}
