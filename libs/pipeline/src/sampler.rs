use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use telemetry_api::{Sample, SampleCodec, SampleSource};

use crate::queue::QueueProducer;
use crate::stats::PublisherStats;

// ═══════════════════════════════════════════════════════════════
//  Sampler
// ═══════════════════════════════════════════════════════════════

/// Sampling-контекст: Sample → codec → Outbound Queue.
///
/// Никогда не ждёт сеть: переполнение и ошибки сериализации только
/// считаются и логируются.
pub struct Sampler {
    codec: Arc<dyn SampleCodec>,
    producer: QueueProducer,
    latest: watch::Sender<Option<Sample>>,
    stats: Arc<PublisherStats>,
}

impl Sampler {
    pub fn new(codec: Arc<dyn SampleCodec>, producer: QueueProducer, stats: Arc<PublisherStats>) -> Self {
        let (latest, _) = watch::channel(None);
        Self { codec, producer, latest, stats }
    }

    /// Push-модель: вызывается из callback'а сенсора.
    /// false = запись не попала в очередь.
    pub fn on_sample(&self, sample: Sample) -> bool {
        self.stats.add_sampled(1);
        self.latest.send_replace(Some(sample));

        let record = match self.codec.serialize(&sample) {
            Ok(record) => record,
            Err(e) => {
                self.stats.add_serialization_errors(1);
                tracing::warn!(error = %e, "sample not serializable, dropping");
                return false;
            }
        };
        self.producer.enqueue(record)
    }

    /// Последнее показание (для отображения), обновляется на каждом sample.
    pub fn latest(&self) -> watch::Receiver<Option<Sample>> {
        self.latest.subscribe()
    }

    /// Pull-модель: опрашивать `source` каждые `interval` до отмены.
    pub fn spawn(self, source: Box<dyn SampleSource>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(source, interval, token))
    }

    pub async fn run(self, mut source: Box<dyn SampleSource>, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // Пропущенные тики не догоняем пачкой
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_ms = interval.as_millis() as u64, "sampler started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(sample) = source.read() {
                        self.on_sample(sample);
                    }
                }
            }
            if self.producer.is_closed() {
                tracing::info!("outbound queue closed");
                break;
            }
        }
        tracing::info!(sampled = self.stats.snapshot().sampled, "sampler stopped");
    }
}
