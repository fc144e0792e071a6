use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes async work per key (checkout id, username).
///
/// Different keys never contend. Idle keys are pruned on the next acquisition.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.retain(|k, slot| k == key || Arc::strong_count(slot) > 1);
            slots.entry(key.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
