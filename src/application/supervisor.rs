use super::connectivity::{Connectivity, ConnectivityPhase, DrainCheck};
use super::store::bounded;
use super::sync::{Reconciler, SyncReport};
use crate::domain::ports::DurableStoreRef;
use crate::error::{PaymentError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timing knobs for the reconnection loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub op_timeout: Duration,
}

/// Owns the single background task that brings the durable store back.
///
/// While disconnected it probes with exponential backoff. A successful probe is
/// followed by index setup and reconciliation; only after the mirror is drained
/// does connectivity flip to connected. While connected it sleeps until a store
/// operation reports a failure.
pub struct ConnectivitySupervisor {
    durable: DurableStoreRef,
    connectivity: Connectivity,
    reconciler: Reconciler,
    settings: SupervisorSettings,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivitySupervisor {
    pub fn new(
        durable: DurableStoreRef,
        connectivity: Connectivity,
        settings: SupervisorSettings,
    ) -> Self {
        let reconciler = Reconciler::new(durable.clone(), connectivity.clone(), settings.op_timeout);
        let (shutdown, _) = watch::channel(false);
        Self {
            durable,
            connectivity,
            reconciler,
            settings,
            running: AtomicBool::new(false),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the reconnection loop. Returns false, doing nothing, if one is alive.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Connectivity supervisor already running");
            return false;
        }
        self.shutdown.send_replace(false);
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move { supervisor.run().await });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One reconnection attempt: probe, indexes, reconciliation, then connect.
    ///
    /// Returns `Ok(true)` when connected afterwards. A failure leaves the engine
    /// disconnected with the mirror intact.
    pub async fn reconnect_once(&self) -> Result<bool> {
        if !self.connectivity.begin_probe() {
            return Ok(self.connectivity.is_reachable());
        }

        match self.probe_and_sync().await {
            Ok(report) => {
                info!(
                    inserted = report.inserted,
                    merged = report.merged,
                    ledger = report.ledger_applied,
                    conflicts = report.conflicts,
                    "Durable store reachable again"
                );
                Ok(true)
            }
            Err(e) => {
                self.connectivity.report_failure(&e);
                Err(e)
            }
        }
    }

    async fn probe_and_sync(&self) -> Result<SyncReport> {
        bounded(self.settings.op_timeout, "ping", self.durable.ping()).await?;
        bounded(
            self.settings.op_timeout,
            "ensure_indexes",
            self.durable.ensure_indexes(),
        )
        .await?;

        let mut total = SyncReport::default();
        loop {
            let report = self.reconciler.run().await?;
            total.inserted += report.inserted;
            total.merged += report.merged;
            total.unchanged += report.unchanged;
            total.ledger_applied += report.ledger_applied;
            total.conflicts += report.conflicts;
            match self.connectivity.connect_if_drained() {
                DrainCheck::Connected => return Ok(total),
                DrainCheck::Backlog => continue,
                DrainCheck::PhaseLost => {
                    return Err(PaymentError::TransientStore(
                        "durable store failure reported during reconciliation".to_string(),
                    ));
                }
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut delay = self.settings.retry_delay;
        info!(retry_delay = ?self.settings.retry_delay, "Connectivity supervisor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.connectivity.phase() == ConnectivityPhase::Connected {
                delay = self.settings.retry_delay;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = self.connectivity.disconnected() => continue,
                }
            }

            match self.reconnect_once().await {
                Ok(true) => {
                    delay = self.settings.retry_delay;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, retry_in = ?delay, "Durable store still unreachable");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.settings.max_retry_delay);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Connectivity supervisor stopped");
    }
}
