use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use telemetry_api::{QoS, now_ms};
use transport_mqtt::BrokerAddr;

use crate::backoff::Backoff;
use crate::error::PipelineError;
use crate::queue::MAX_QUEUE_CAPACITY;

/// Максимальная длина строки в MQTT (u16 length prefix).
const MAX_MQTT_STRING: usize = u16::MAX as usize;

/// Потолок для всех `*_ms`: сутки. Дедлайны считаются как
/// `Instant::now() + d`, сложение не должно переполняться.
const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;

// ═══════════════════════════════════════════════════════════════
//  Retry / Shutdown policies
// ═══════════════════════════════════════════════════════════════

/// Что делать с записью, если publish упал по транспортной ошибке.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Выбросить запись, перейти к следующей.
    Drop,
    /// Удержать запись в голове очереди и повторить после переподключения
    /// (не более `max_retries` повторов).
    #[default]
    Requeue,
}

/// Судьба записей, оставшихся в очереди при остановке.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    #[default]
    Discard,
    /// Попытаться отправить остаток, не дольше `drain_timeout_ms`.
    Drain,
}

// ═══════════════════════════════════════════════════════════════
//  Publisher Config
// ═══════════════════════════════════════════════════════════════

/// Конфигурация publisher'а. Все поля опциональны в TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// `tcp://host[:port]` или `mqtt://host[:port]`.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    /// None = сгенерировать `telemetry-<unix millis>` при старте.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub shutdown: ShutdownMode,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Как часто publisher просыпается без новых записей (keep-alive, cancel).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

fn default_broker_url() -> String {
    "tcp://broker.hivemq.com:1883".into()
}
fn default_topic() -> String {
    "android/sensors".into()
}
fn default_queue_capacity() -> usize {
    64
}
fn default_backoff_min_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_keep_alive_secs() -> u16 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_drain_timeout_ms() -> u64 {
    2_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_publish_timeout_ms() -> u64 {
    5_000
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            topic: default_topic(),
            client_id: None,
            queue_capacity: default_queue_capacity(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            qos: QoS::default(),
            keep_alive_secs: default_keep_alive_secs(),
            retry_policy: RetryPolicy::default(),
            max_retries: default_max_retries(),
            shutdown: ShutdownMode::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl PublisherConfig {
    /// Загрузить из TOML-файла.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
            context: "read",
            detail: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content).map_err(|e| PipelineError::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }

    /// Проверка до старта: только эти ошибки фатальны.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.broker()?;

        if self.topic.is_empty() {
            return Err(PipelineError::Invalid("topic must not be empty".into()));
        }
        if self.topic.contains(['+', '#']) {
            return Err(PipelineError::Invalid(format!(
                "topic '{}': wildcards are not allowed in publish topics",
                self.topic
            )));
        }
        if self.topic.contains('\0') || self.topic.len() > MAX_MQTT_STRING {
            return Err(PipelineError::Invalid("topic: NUL or too long".into()));
        }
        if let Some(id) = &self.client_id {
            if id.is_empty() || id.len() > MAX_MQTT_STRING {
                return Err(PipelineError::Invalid("client_id must be 1..=65535 bytes".into()));
            }
        }
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(PipelineError::Invalid(format!(
                "queue_capacity must be 1..={MAX_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }
        if self.backoff_min_ms == 0 {
            return Err(PipelineError::Invalid("backoff_min_ms must be positive".into()));
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(PipelineError::Invalid(format!(
                "backoff_min_ms ({}) > backoff_max_ms ({})",
                self.backoff_min_ms, self.backoff_max_ms
            )));
        }
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("publish_timeout_ms", self.publish_timeout_ms),
        ] {
            if value == 0 {
                return Err(PipelineError::Invalid(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("backoff_max_ms", self.backoff_max_ms),
            ("drain_timeout_ms", self.drain_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("publish_timeout_ms", self.publish_timeout_ms),
        ] {
            if value > MAX_INTERVAL_MS {
                return Err(PipelineError::Invalid(format!(
                    "{name} = {value} exceeds {MAX_INTERVAL_MS}"
                )));
            }
        }
        Ok(())
    }

    pub fn broker(&self) -> Result<BrokerAddr, PipelineError> {
        Ok(self.broker_url.parse()?)
    }

    /// Настроенный client id или `telemetry-<unix millis>`.
    pub fn resolve_client_id(&self) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => format!("telemetry-{}", now_ms()),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}
