use super::callbacks::{CallbackConsumer, CallbackQueue, CompletionHandler, callback_queue};
use super::connectivity::Connectivity;
use super::engine::{EngineSettings, PaymentEngine};
use super::ledger::StoreLedger;
use super::store::TransactionRecordStore;
use super::supervisor::{ConnectivitySupervisor, SupervisorSettings};
use crate::config::EngineConfig;
use crate::domain::plan::PlanCatalog;
use crate::domain::ports::{DurableStoreRef, PaymentGatewayRef};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The wired-up engine: one connectivity object, one supervisor, one callback
/// consumer, one orchestrator.
pub struct EngineRuntime {
    engine: Arc<PaymentEngine>,
    supervisor: Arc<ConnectivitySupervisor>,
    queue: Mutex<Option<CallbackQueue>>,
    consumer: Mutex<Option<JoinHandle<usize>>>,
    pending_consumer: Mutex<Option<CallbackConsumer>>,
}

impl EngineRuntime {
    pub fn assemble(
        config: &EngineConfig,
        durable: DurableStoreRef,
        gateway: PaymentGatewayRef,
    ) -> Self {
        let connectivity = Connectivity::new();
        let store = TransactionRecordStore::new(
            durable.clone(),
            connectivity.clone(),
            config.store.op_timeout(),
        );
        let ledger = Arc::new(StoreLedger::new(store.clone()));
        let engine = Arc::new(PaymentEngine::new(
            store,
            ledger,
            gateway,
            EngineSettings {
                plans: PlanCatalog::default(),
                callback_url: config.gateway.callback_url.clone(),
                gateway_timeout: config.gateway.timeout(),
                pending_timeout: config.store.pending_timeout(),
            },
        ));
        let supervisor = Arc::new(ConnectivitySupervisor::new(
            durable,
            connectivity,
            SupervisorSettings {
                retry_delay: config.store.retry_delay(),
                max_retry_delay: config.store.max_retry_delay(),
                op_timeout: config.store.op_timeout(),
            },
        ));
        let (queue, consumer) = callback_queue();

        Self {
            engine,
            supervisor,
            queue: Mutex::new(Some(queue)),
            consumer: Mutex::new(None),
            pending_consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Spawns the supervisor loop and the callback consumer. Idempotent.
    pub fn start(&self) {
        self.supervisor.start();
        let consumer = self
            .pending_consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumer) = consumer {
            let handler: Arc<dyn CompletionHandler> = self.engine.clone();
            let handle = tokio::spawn(consumer.run(handler));
            *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            info!("Engine runtime started");
        }
    }

    pub fn engine(&self) -> &Arc<PaymentEngine> {
        &self.engine
    }

    pub fn supervisor(&self) -> &Arc<ConnectivitySupervisor> {
        &self.supervisor
    }

    pub fn connectivity(&self) -> &Connectivity {
        self.supervisor.connectivity()
    }

    /// Producer handle for the callback queue; `None` once shut down.
    pub fn queue(&self) -> Option<CallbackQueue> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Closes the queue, lets the consumer drain it within `grace`, and stops the
    /// supervisor.
    pub async fn shutdown(&self, grace: Duration) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = consumer {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(processed)) => info!(processed, "Callback queue drained"),
                Ok(Err(e)) => warn!(error = %e, "Callback consumer panicked"),
                Err(_) => {
                    warn!("Callback queue not drained in time, aborting consumer");
                    handle.abort();
                }
            }
        }

        self.supervisor.shutdown().await;
        let backlog = self.connectivity().mirror_backlog();
        if backlog > 0 {
            warn!(backlog, "Shutting down with unsynced mirror entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::callbacks::CallbackNotice;
    use crate::application::engine::InitiateOutcome;
    use crate::domain::ports::{PaymentGateway, StkOutcome, StkRequest};
    use crate::domain::transaction::TransactionStatus;
    use crate::error::Result;
    use crate::infrastructure::in_memory::InMemoryDurableStore;
    use async_trait::async_trait;

    struct DeferringGateway;

    #[async_trait]
    impl PaymentGateway for DeferringGateway {
        async fn request_stk(&self, _request: &StkRequest) -> Result<StkOutcome> {
            Ok(StkOutcome::Deferred {
                checkout_id: "CO123".into(),
            })
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.store.retry_delay_ms = 10;
        config.store.max_retry_delay_ms = 50;
        config.store.op_timeout_ms = 200;
        config
    }

    #[tokio::test]
    async fn test_queued_callback_completes_payment() {
        let runtime = EngineRuntime::assemble(
            &config(),
            Arc::new(InMemoryDurableStore::new()),
            Arc::new(DeferringGateway),
        );
        runtime.start();
        runtime.start();

        let outcome = runtime
            .engine()
            .initiate("alice", "basic", "0712345678")
            .await
            .unwrap();
        assert!(matches!(outcome, InitiateOutcome::Pending { .. }));

        let queue = runtime.queue().unwrap();
        queue
            .enqueue(CallbackNotice::new("CO123", Some("REF1".into())))
            .unwrap();
        queue
            .enqueue(CallbackNotice::new("CO123", Some("REF1".into())))
            .unwrap();
        drop(queue);
        runtime.shutdown(Duration::from_secs(2)).await;

        let view = runtime.engine().status(&"CO123".into()).await.unwrap();
        assert_eq!(view.status, TransactionStatus::Completed);
        assert_eq!(
            runtime.engine().balance("alice").await.unwrap().word_balance,
            1_500
        );
        assert!(runtime.queue().is_none());
    }
}
