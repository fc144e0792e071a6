use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the engine can be configured with. Every field has a default, so an
/// empty YAML document is a valid configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: String,
    pub use_json: bool,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub callback: CallbackConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    /// Public URL the gateway posts callbacks to.
    pub callback_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// RocksDB directory; in-memory storage when unset.
    pub db_path: Option<PathBuf>,
    pub op_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Pending payments older than this are failed on status queries.
    pub pending_timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CallbackConfig {
    pub listen: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            use_json: false,
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            callback: CallbackConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://lipia-api.kreativelabske.com/api".to_string(),
            api_key: String::new(),
            timeout_ms: 5_000,
            callback_url: "http://localhost:5000/payment/callback".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            op_timeout_ms: 3_000,
            retry_delay_ms: 10_000,
            max_retry_delay_ms: 60_000,
            pending_timeout_secs: None,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_secs.map(Duration::from_secs)
    }
}

impl EngineConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| PaymentError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Applies `LIPIA_API_URL`, `LIPIA_API_KEY`, `CALLBACK_URL` and `CALLBACK_LISTEN`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LIPIA_API_URL") {
            self.gateway.base_url = url;
        }
        if let Some(key) = lookup("LIPIA_API_KEY") {
            self.gateway.api_key = key;
        }
        if let Some(url) = lookup("CALLBACK_URL") {
            self.gateway.callback_url = url;
        }
        if let Some(listen) = lookup("CALLBACK_LISTEN") {
            self.callback.listen = listen;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.max_retry_delay_ms < self.store.retry_delay_ms {
            return Err(PaymentError::Config(
                "store.max_retry_delay_ms must not be below store.retry_delay_ms".to_string(),
            ));
        }
        if self.store.op_timeout_ms == 0 || self.gateway.timeout_ms == 0 {
            return Err(PaymentError::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }
}
