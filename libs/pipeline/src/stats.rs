use std::sync::atomic::{AtomicU64, Ordering};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use telemetry_api::ConnectionState;

/// Счётчики pipeline. Пишут sampler и publisher, читает кто угодно.
#[derive(Debug, Default)]
pub struct PublisherStats {
    sampled: AtomicU64,
    serialization_errors: AtomicU64,
    enqueued: AtomicU64,
    overflow_dropped: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    failed_dropped: AtomicU64,
    retries_exhausted: AtomicU64,
    discarded_on_shutdown: AtomicU64,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
}

/// Мгновенный снимок счётчиков.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sampled: u64,
    pub serialization_errors: u64,
    pub enqueued: u64,
    pub overflow_dropped: u64,
    pub published: u64,
    pub publish_failures: u64,
    /// Выброшены после ошибки publish при `retry_policy = drop`
    /// или при неповторяемой ошибке.
    pub failed_dropped: u64,
    pub retries_exhausted: u64,
    pub discarded_on_shutdown: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
}

macro_rules! counters {
    ($($field:ident => $inc:ident),* $(,)?) => {
        impl PublisherStats {
            $(
                pub(crate) fn $inc(&self, n: u64) {
                    self.$field.fetch_add(n, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    sampled => add_sampled,
    serialization_errors => add_serialization_errors,
    enqueued => add_enqueued,
    overflow_dropped => add_overflow_dropped,
    published => add_published,
    publish_failures => add_publish_failures,
    failed_dropped => add_failed_dropped,
    retries_exhausted => add_retries_exhausted,
    discarded_on_shutdown => add_discarded_on_shutdown,
    connect_attempts => add_connect_attempts,
    connect_failures => add_connect_failures,
}

impl PublisherStats {
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped.load(Ordering::Relaxed)
    }
}

impl StatsSnapshot {
    /// Все записи, потерянные по любой причине.
    pub fn lost(&self) -> u64 {
        self.serialization_errors
            + self.overflow_dropped
            + self.failed_dropped
            + self.retries_exhausted
            + self.discarded_on_shutdown
    }
}

// ═══════════════════════════════════════════════════════════════
//  Status
// ═══════════════════════════════════════════════════════════════

/// Status-интерфейс для хоста: счётчики + текущее состояние соединения.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    stats: Arc<PublisherStats>,
    state: watch::Receiver<ConnectionState>,
}

impl StatusHandle {
    pub(crate) fn new(stats: Arc<PublisherStats>, state: watch::Receiver<ConnectionState>) -> Self {
        Self { stats, state }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Дождаться смены состояния. Err = publisher завершился.
    pub async fn state_changed(&mut self) -> Result<ConnectionState, watch::error::RecvError> {
        self.state.changed().await?;
        Ok(*self.state.borrow_and_update())
    }

    /// Дождаться конкретного состояния (например, Connected).
    pub async fn wait_for(&mut self, target: ConnectionState) -> Result<(), watch::error::RecvError> {
        self.state.wait_for(|s| *s == target).await.map(|_| ())
    }
}
