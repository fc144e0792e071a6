use super::mirror::FallbackMirror;
use crate::error::PaymentError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Reachability of the durable store as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityPhase {
    Disconnected,
    /// Probe, index setup and reconciliation in progress. Writes still go to the mirror.
    Probing,
    Connected,
}

impl fmt::Display for ConnectivityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityPhase::Disconnected => "disconnected",
            ConnectivityPhase::Probing => "probing",
            ConnectivityPhase::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// What `Connectivity::connect_if_drained` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainCheck {
    Connected,
    /// The mirror still holds entries to replay.
    Backlog,
    /// A failure was reported after the probe began; the phase is no longer Probing.
    PhaseLost,
}

pub(crate) struct SharedState {
    pub(crate) phase: ConnectivityPhase,
    pub(crate) mirror: FallbackMirror,
}

/// Process-wide connectivity flag and fallback mirror.
///
/// Both live behind one mutex, which is never held across an await point.
/// Cloning shares the same state.
#[derive(Clone)]
pub struct Connectivity {
    state: Arc<Mutex<SharedState>>,
    lost: Arc<Notify>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity {
    /// Starts disconnected; the supervisor flips it after the first successful probe.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SharedState {
                phase: ConnectivityPhase::Disconnected,
                mirror: FallbackMirror::new(),
            })),
            lost: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn phase(&self) -> ConnectivityPhase {
        self.lock().phase
    }

    pub fn is_reachable(&self) -> bool {
        self.phase() == ConnectivityPhase::Connected
    }

    /// Entries still waiting in the mirror, conflicted ones included.
    pub fn mirror_backlog(&self) -> usize {
        self.lock().mirror.len()
    }

    /// Records a failed durable operation. Wakes the supervisor on the first failure.
    pub fn report_failure(&self, err: &PaymentError) {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.phase, ConnectivityPhase::Disconnected)
        };
        if previous == ConnectivityPhase::Connected {
            warn!(error = %err, "Durable store unreachable, switching to fallback mirror");
            self.lost.notify_one();
        }
    }

    /// Disconnected -> Probing. Returns false if already probing or connected.
    pub(crate) fn begin_probe(&self) -> bool {
        let mut state = self.lock();
        if state.phase != ConnectivityPhase::Disconnected {
            return false;
        }
        state.phase = ConnectivityPhase::Probing;
        true
    }

    /// Probing -> Connected, but only once the mirror has nothing left to replay.
    ///
    /// The check and the flip happen under the same lock, so a write that lands in
    /// the mirror during sync is always replayed before direct writes resume.
    pub(crate) fn connect_if_drained(&self) -> DrainCheck {
        let mut state = self.lock();
        if state.phase != ConnectivityPhase::Probing {
            return DrainCheck::PhaseLost;
        }
        if state.mirror.has_unsynced() {
            return DrainCheck::Backlog;
        }
        state.phase = ConnectivityPhase::Connected;
        info!(
            conflicted = state.mirror.conflicted(),
            "Durable store connected"
        );
        DrainCheck::Connected
    }

    /// Resolves once a failure has been reported after the last connect.
    pub(crate) async fn disconnected(&self) {
        if !self.is_reachable() {
            return;
        }
        self.lost.notified().await;
    }
}
