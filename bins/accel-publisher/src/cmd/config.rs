use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use pipeline::PublisherConfig;

use super::error::AccelError;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Период опроса сенсора в мс.
    pub sample_interval_ms: Option<u64>,
    /// Как часто печатать статистику, в секундах.
    pub stats_interval_secs: Option<u64>,
    pub seed: Option<i64>,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

pub fn load_config(path: &str) -> Result<Config, AccelError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| AccelError::Config(format!("cannot read config {path}: {e}")))?;
    parse_config(&content).map_err(|e| AccelError::Config(format!("bad config {path}: {e}")))
}

fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct PublisherArgs {
    /// Путь к config.toml
    #[arg(long, default_value = "config.toml", env = "ACCEL_PUBLISHER_CONFIG")]
    pub config: String,

    /// Брокер, напр. tcp://broker.hivemq.com:1883
    #[arg(long)]
    pub broker_url: Option<String>,

    /// MQTT topic
    #[arg(long)]
    pub topic: Option<String>,

    /// Client id (по умолчанию telemetry-<unix millis>)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Период опроса сенсора в мс (200 ≈ SENSOR_DELAY_NORMAL)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Период вывода статистики в секундах
    #[arg(long)]
    pub stats_secs: Option<u64>,

    /// Seed для PRNG симулятора (0 = текущее время)
    #[arg(long)]
    pub seed: Option<i64>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация после мержа: config.toml < env/CLI
#[derive(Debug)]
pub struct Effective {
    pub publisher: PublisherConfig,
    pub sample_interval: Duration,
    pub stats_interval: Duration,
    pub seed: i64,
}

impl Effective {
    pub fn new(args: &PublisherArgs) -> Result<Self, AccelError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(args, cfg)
    }

    fn merge(args: &PublisherArgs, cfg: Config) -> Result<Self, AccelError> {
        let mut publisher = cfg.publisher;
        if let Some(url) = &args.broker_url {
            publisher.broker_url = url.clone();
        }
        if let Some(topic) = &args.topic {
            publisher.topic = topic.clone();
        }
        if args.client_id.is_some() {
            publisher.client_id = args.client_id.clone();
        }

        let sample_interval_ms = args.interval_ms.or(cfg.sample_interval_ms).unwrap_or(200);
        if sample_interval_ms == 0 {
            return Err(AccelError::Config("sample interval must be positive".into()));
        }
        let stats_interval_secs = args.stats_secs.or(cfg.stats_interval_secs).unwrap_or(10).max(1);

        Ok(Self {
            publisher,
            sample_interval: Duration::from_millis(sample_interval_ms),
            stats_interval: Duration::from_secs(stats_interval_secs),
            seed: args.seed.or(cfg.seed).unwrap_or(0),
        })
    }
}
