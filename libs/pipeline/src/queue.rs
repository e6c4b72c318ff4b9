use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;

use telemetry_api::{TelemetryError, WireRecord};

use crate::stats::PublisherStats;

/// Предупреждение о переполнении пишется для первой потери и затем
/// для каждой N-й, чтобы 50Hz сэмплинг не заливал лог.
const OVERFLOW_LOG_EVERY: u64 = 100;

/// Верхняя граница ёмкости очереди.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

// ═══════════════════════════════════════════════════════════════
//  Outbound Queue
// ═══════════════════════════════════════════════════════════════

/// Ограниченная FIFO-очередь между sampling и publishing контекстами.
///
/// Один producer, один consumer. Переполнение = drop-newest:
/// `enqueue` никогда не блокирует. Ёмкость приводится к
/// `1..=MAX_QUEUE_CAPACITY`.
pub fn outbound_queue(capacity: usize, stats: Arc<PublisherStats>) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
    let (tx, rx) = mpsc::channel(capacity);
    (QueueProducer { tx, capacity, stats }, QueueConsumer { rx, capacity })
}

/// Сторона sampling-контекста.
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<WireRecord>,
    capacity: usize,
    stats: Arc<PublisherStats>,
}

impl QueueProducer {
    /// false = запись не принята (очередь полна или закрыта).
    pub fn enqueue(&self, record: WireRecord) -> bool {
        self.try_enqueue(record).is_ok()
    }

    pub fn try_enqueue(&self, record: WireRecord) -> Result<(), TelemetryError> {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.stats.add_enqueued(1);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.add_overflow_dropped(1);
                let dropped = self.stats.overflow_dropped();
                if dropped == 1 || dropped % OVERFLOW_LOG_EVERY == 0 {
                    tracing::warn!(capacity = self.capacity, dropped, "outbound queue full, dropping sample");
                }
                Err(TelemetryError::QueueFull { capacity: self.capacity })
            }
            Err(TrySendError::Closed(_)) => Err(TelemetryError::ShutdownInProgress),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Сколько записей сейчас в очереди.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumer закрыл очередь (shutdown).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Сторона publishing-контекста.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<WireRecord>,
    capacity: usize,
}

impl QueueConsumer {
    /// Ждать следующую запись. None = очередь закрыта и пуста.
    pub async fn recv(&mut self) -> Option<WireRecord> {
        self.rx.recv().await
    }

    /// Ждать следующую запись или отмену.
    pub async fn dequeue(&mut self, token: &CancellationToken) -> Option<WireRecord> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            record = self.rx.recv() => record,
        }
    }

    pub fn try_dequeue(&mut self) -> Option<WireRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Больше не принимать записи. Уже лежащие можно дочитать.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Закрыть и выбросить остаток. Возвращает число выброшенных.
    pub fn discard_remaining(&mut self) -> u64 {
        self.close();
        let mut discarded = 0;
        while self.try_dequeue().is_some() {
            discarded += 1;
        }
        discarded
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
