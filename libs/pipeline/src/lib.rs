//! Sampled telemetry pipeline: Sampler → Outbound Queue → Publisher Loop → Sink Connection.
//!
//! Sampling и publishing: два независимых контекста, связанных только
//! ограниченной очередью. Сеть никогда не тормозит sampling.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod sampler;
pub mod stats;

#[cfg(test)]
mod mock;

use std::sync::Arc;

use telemetry_api::{SampleCodec, Transport};
use format_json::JsonCodec;
use transport_mqtt::{MqttOptions, MqttTransport};

pub use backoff::Backoff;
pub use config::{PublisherConfig, RetryPolicy, ShutdownMode};
pub use connection::SinkConnection;
pub use error::PipelineError;
pub use publisher::{PublisherHandle, PublisherLoop, PublisherSettings};
pub use queue::{QueueConsumer, QueueProducer, outbound_queue};
pub use sampler::Sampler;
pub use stats::{PublisherStats, StatsSnapshot, StatusHandle};

// ═══════════════════════════════════════════════════════════════
//  Assembly
// ═══════════════════════════════════════════════════════════════

/// Собранный, но ещё не запущенный pipeline.
///
/// Хост забирает `Sampler` (push через `on_sample` или pull через
/// `Sampler::spawn`) и запускает `PublisherLoop::start`.
pub struct TelemetryPipeline {
    client_id: String,
    sampler: Sampler,
    publisher: PublisherLoop,
}

impl TelemetryPipeline {
    /// MQTT + JSON по конфигурации. Единственная точка, где ошибка
    /// конфигурации (например, невалидный broker_url) доходит до хоста.
    pub fn mqtt(config: &PublisherConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let client_id = config.resolve_client_id();

        let mut options = MqttOptions::new(config.broker()?, client_id.clone());
        options.qos = config.qos;
        options.keep_alive = config.keep_alive();

        Ok(Self::assemble(
            config,
            client_id,
            Arc::new(JsonCodec),
            Box::new(MqttTransport::new(options)),
        ))
    }

    /// С произвольным codec и транспортом.
    pub fn with_transport(
        config: &PublisherConfig,
        codec: Arc<dyn SampleCodec>,
        transport: Box<dyn Transport>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::assemble(config, config.resolve_client_id(), codec, transport))
    }

    fn assemble(
        config: &PublisherConfig,
        client_id: String,
        codec: Arc<dyn SampleCodec>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let stats = Arc::new(PublisherStats::default());
        let (producer, consumer) = outbound_queue(config.queue_capacity, stats.clone());

        let connection = SinkConnection::new(client_id.clone(), transport)
            .with_timeouts(config.connect_timeout(), config.publish_timeout());
        let publisher = PublisherLoop::new(
            connection,
            consumer,
            config.backoff(),
            PublisherSettings::from_config(config),
            stats.clone(),
        );
        let sampler = Sampler::new(codec, producer, stats);

        tracing::debug!(
            %client_id,
            topic = %config.topic,
            queue_capacity = config.queue_capacity,
            "pipeline assembled"
        );
        Self { client_id, sampler, publisher }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn status(&self) -> StatusHandle {
        self.publisher.status()
    }

    pub fn into_parts(self) -> (Sampler, PublisherLoop) {
        (self.sampler, self.publisher)
    }
}
