//! Intake of gateway callbacks.
//!
//! Receipt and processing are decoupled by an unbounded channel: the HTTP handler
//! only enqueues, and a single consumer task completes transactions in arrival
//! order. Failures are logged and the notice is dropped.

use super::engine::CompletionOutcome;
use crate::domain::transaction::CheckoutId;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Body the gateway posts once an STK push settles.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct CallbackNotice {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_id: CheckoutId,
    #[serde(default)]
    pub reference: Option<String>,
}

impl CallbackNotice {
    pub fn new(checkout_id: impl Into<CheckoutId>, reference: Option<String>) -> Self {
        Self {
            checkout_id: checkout_id.into(),
            reference,
        }
    }
}

/// Whatever completes transactions from callbacks.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    /// Completes the transaction named by `notice`. A notice for an already
    /// settled transaction fails with `DuplicateCallback`.
    async fn handle_callback(&self, notice: CallbackNotice) -> Result<CompletionOutcome>;
}

/// Runs `handler` on one notice and logs the result by error kind.
pub async fn dispatch(handler: &dyn CompletionHandler, notice: CallbackNotice) -> Result<CompletionOutcome> {
    let checkout_id = notice.checkout_id.clone();
    let result = handler.handle_callback(notice).await;
    match &result {
        Ok(outcome) => info!(%checkout_id, ?outcome, "Callback processed"),
        Err(PaymentError::DuplicateCallback(_)) => {
            debug!(%checkout_id, "Duplicate callback ignored")
        }
        Err(PaymentError::NotFound(_)) => {
            warn!(%checkout_id, "Callback for unknown checkout id")
        }
        Err(e) => error!(%checkout_id, error = %e, "Callback processing failed"),
    }
    result
}

/// Producer side; cheap to clone into request handlers.
#[derive(Clone)]
pub struct CallbackQueue {
    tx: mpsc::UnboundedSender<CallbackNotice>,
}

impl CallbackQueue {
    pub fn enqueue(&self, notice: CallbackNotice) -> Result<()> {
        debug!(checkout_id = %notice.checkout_id, "Callback queued");
        self.tx
            .send(notice)
            .map_err(|_| PaymentError::Config("callback consumer has stopped".to_string()))
    }
}

/// Consumer side. There is exactly one per queue.
pub struct CallbackConsumer {
    rx: mpsc::UnboundedReceiver<CallbackNotice>,
}

impl CallbackConsumer {
    /// Drains the queue until every producer is dropped. Returns how many notices
    /// were taken off the queue.
    pub async fn run(mut self, handler: Arc<dyn CompletionHandler>) -> usize {
        let mut processed = 0;
        while let Some(notice) = self.rx.recv().await {
            let _ = dispatch(handler.as_ref(), notice).await;
            processed += 1;
        }
        info!(processed, "Callback consumer stopped");
        processed
    }
}

pub fn callback_queue() -> (CallbackQueue, CallbackConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CallbackQueue { tx }, CallbackConsumer { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<CheckoutId>>,
    }

    #[async_trait]
    impl CompletionHandler for Recorder {
        async fn handle_callback(&self, notice: CallbackNotice) -> Result<CompletionOutcome> {
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&notice.checkout_id) {
                return Err(PaymentError::DuplicateCallback(notice.checkout_id.to_string()));
            }
            seen.push(notice.checkout_id.clone());
            Ok(CompletionOutcome::Completed {
                checkout_id: notice.checkout_id,
                words_credited: 1,
            })
        }
    }

    #[test]
    fn test_notice_wire_format() {
        let notice: CallbackNotice =
            serde_json::from_str(r#"{"CheckoutRequestID":"CO123","reference":"REF1"}"#).unwrap();
        assert_eq!(notice, CallbackNotice::new("CO123", Some("REF1".into())));

        let bare: CallbackNotice = serde_json::from_str(r#"{"CheckoutRequestID":"CO9"}"#).unwrap();
        assert_eq!(bare.reference, None);
    }

    #[tokio::test]
    async fn test_consumer_processes_in_order() {
        let (queue, consumer) = callback_queue();
        let recorder = Arc::new(Recorder::default());
        let worker = tokio::spawn(consumer.run(recorder.clone()));

        queue.enqueue(CallbackNotice::new("CO1", None)).unwrap();
        queue.enqueue(CallbackNotice::new("CO2", None)).unwrap();
        queue.enqueue(CallbackNotice::new("CO1", None)).unwrap();
        drop(queue);

        assert_eq!(worker.await.unwrap(), 3);
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![CheckoutId::from("CO1"), CheckoutId::from("CO2")]);
    }

    #[tokio::test]
    async fn test_dispatch_surfaces_duplicates() {
        let recorder = Recorder::default();
        dispatch(&recorder, CallbackNotice::new("CO1", None))
            .await
            .unwrap();
        let err = dispatch(&recorder, CallbackNotice::new("CO1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateCallback(_)));
    }

    #[test]
    fn test_enqueue_after_consumer_gone() {
        let (queue, consumer) = callback_queue();
        drop(consumer);
        assert!(queue.enqueue(CallbackNotice::new("CO1", None)).is_err());
    }
}
