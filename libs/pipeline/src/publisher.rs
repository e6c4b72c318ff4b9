use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use telemetry_api::{TelemetryError, WireRecord};

use crate::backoff::Backoff;
use crate::config::{PublisherConfig, RetryPolicy, ShutdownMode};
use crate::connection::SinkConnection;
use crate::queue::QueueConsumer;
use crate::stats::{PublisherStats, StatusHandle};

// ═══════════════════════════════════════════════════════════════
//  Publisher Settings
// ═══════════════════════════════════════════════════════════════

/// Политики publisher-цикла (подмножество `PublisherConfig`).
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub topic: String,
    pub retry_policy: RetryPolicy,
    /// Сколько раз повторить запись после первой неудачи (при Requeue).
    pub max_retries: u32,
    pub shutdown: ShutdownMode,
    pub drain_timeout: Duration,
    pub poll_interval: Duration,
}

impl PublisherSettings {
    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            retry_policy: config.retry_policy,
            max_retries: config.max_retries,
            shutdown: config.shutdown,
            drain_timeout: config.drain_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Запись, ожидающая повтора, вместе с числом неудачных попыток.
#[derive(Debug)]
struct Pending {
    record: WireRecord,
    failures: u32,
}

// ═══════════════════════════════════════════════════════════════
//  Publisher Loop
// ═══════════════════════════════════════════════════════════════

/// Publishing-контекст: читает Outbound Queue и публикует через
/// SinkConnection, переподключаясь с backoff.
///
/// Единственный владелец соединения. Запись, которую надо повторить,
/// держится в `pending` как голова очереди, порядок не нарушается.
pub struct PublisherLoop {
    connection: SinkConnection,
    queue: QueueConsumer,
    backoff: Backoff,
    settings: PublisherSettings,
    stats: Arc<PublisherStats>,
    pending: Option<Pending>,
}

impl PublisherLoop {
    pub fn new(
        connection: SinkConnection,
        queue: QueueConsumer,
        backoff: Backoff,
        settings: PublisherSettings,
        stats: Arc<PublisherStats>,
    ) -> Self {
        Self { connection, queue, backoff, settings, stats, pending: None }
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle::new(self.stats.clone(), self.connection.subscribe_state())
    }

    /// Запустить цикл отдельной задачей.
    pub fn start(self, token: CancellationToken) -> PublisherHandle {
        let handle = tokio::spawn(self.run(token.clone()));
        PublisherHandle { token, handle }
    }

    /// Цикл до отмены `token` (или закрытия очереди), затем drain/discard
    /// и закрытие соединения.
    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!(
            client_id = %self.connection.client_id(),
            peer = %self.connection.peer(),
            topic = %self.settings.topic,
            "publisher started"
        );

        // При Drain отмена не прерывает операцию на соединении, а даёт ей
        // завершиться до дедлайна drain. Дедлайн фиксируется при отмене.
        let grace = (self.settings.shutdown == ShutdownMode::Drain).then_some(self.settings.drain_timeout);
        let mut drain_deadline: Option<Instant> = None;

        let mut next_attempt = Instant::now();
        loop {
            if token.is_cancelled() {
                break;
            }

            // ── Reconnect ──
            if !self.connection.is_connected() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next_attempt) => {}
                }

                self.stats.add_connect_attempts(1);
                let connect = self.connection.connect();
                let Some(result) = finish_or_cancel(connect, &token, grace, &mut drain_deadline).await else {
                    self.connection.abandon();
                    break;
                };

                match result {
                    Ok(()) => {
                        if self.backoff.attempt() > 0 {
                            tracing::info!(attempts = self.backoff.attempt() + 1, queued = self.queue.len(), "reconnected");
                        }
                        self.backoff.reset();
                    }
                    Err(TelemetryError::ShutdownInProgress) => break,
                    Err(e) => {
                        self.stats.add_connect_failures(1);
                        let delay = self.backoff.next_delay();
                        next_attempt = Instant::now() + delay;
                        tracing::warn!(
                            peer = %self.connection.peer(),
                            error = %e,
                            attempt = self.backoff.attempt(),
                            retry_in_ms = delay.as_millis() as u64,
                            "connect failed"
                        );
                    }
                }
                continue;
            }

            // ── Next record: pending retry first, then queue ──
            let pending = match self.pending.take() {
                Some(pending) => pending,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        record = self.queue.recv() => record,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {
                            // Простой: поддержать соединение
                            let keep_alive = self.connection.keep_alive();
                            let Some(result) = finish_or_cancel(keep_alive, &token, grace, &mut drain_deadline).await else {
                                self.connection.abandon();
                                break;
                            };
                            if let Err(e) = result {
                                tracing::warn!(error = %e, "keep-alive failed");
                            }
                            continue;
                        }
                    };
                    match next {
                        Some(record) => Pending { record, failures: 0 },
                        None => {
                            tracing::info!("outbound queue closed");
                            break;
                        }
                    }
                }
            };

            // ── Publish ──
            let publish = self.connection.publish(&self.settings.topic, pending.record.as_bytes());
            let Some(result) = finish_or_cancel(publish, &token, grace, &mut drain_deadline).await else {
                self.connection.abandon();
                self.pending = Some(pending);
                break;
            };
            self.settle(pending, result);
        }

        let deadline = drain_deadline.unwrap_or_else(|| Instant::now() + self.settings.drain_timeout);
        self.shutdown(deadline).await;
    }

    /// Результат одной попытки publish → счётчики и политика повтора.
    fn settle(&mut self, pending: Pending, result: Result<(), TelemetryError>) {
        let e = match result {
            Ok(()) => {
                self.stats.add_published(1);
                tracing::trace!(bytes = pending.record.len(), "published");
                return;
            }
            Err(e) => e,
        };
        self.stats.add_publish_failures(1);

        if !e.is_transient() {
            self.stats.add_failed_dropped(1);
            tracing::error!(error = %e, kind = %e.kind(), "publish rejected, dropping record");
            return;
        }

        match self.settings.retry_policy {
            RetryPolicy::Drop => {
                self.stats.add_failed_dropped(1);
                tracing::warn!(error = %e, "publish failed, dropping record");
            }
            RetryPolicy::Requeue => {
                let failures = pending.failures + 1;
                if failures > self.settings.max_retries {
                    self.stats.add_retries_exhausted(1);
                    tracing::warn!(error = %e, failures, "publish retries exhausted, dropping record");
                } else {
                    tracing::debug!(error = %e, failures, "publish failed, will retry after reconnect");
                    self.pending = Some(Pending { record: pending.record, failures });
                }
            }
        }
    }

    async fn shutdown(&mut self, deadline: Instant) {
        match self.settings.shutdown {
            ShutdownMode::Drain if self.connection.is_connected() => self.drain(deadline).await,
            ShutdownMode::Drain => tracing::info!("not connected, discarding instead of draining"),
            ShutdownMode::Discard => {}
        }

        let discarded = u64::from(self.pending.take().is_some()) + self.queue.discard_remaining();
        if discarded > 0 {
            self.stats.add_discarded_on_shutdown(discarded);
            tracing::info!(discarded, "discarded queued records");
        }

        if let Err(e) = self.connection.close().await {
            tracing::warn!(error = %e, "connection close failed");
        }
        let stats = self.stats.snapshot();
        tracing::info!(
            published = stats.published,
            overflow_dropped = stats.overflow_dropped,
            lost = stats.lost(),
            "publisher stopped"
        );
    }

    /// Отправить остаток очереди до `deadline` (отмена + `drain_timeout`).
    /// Первая же ошибка прекращает drain: остаток уйдёт в discard.
    async fn drain(&mut self, deadline: Instant) {
        self.queue.close();
        let mut drained = 0u64;

        loop {
            let record = match self.pending.take() {
                Some(pending) => pending.record,
                None => match self.queue.try_dequeue() {
                    Some(record) => record,
                    None => break,
                },
            };

            let publish = self.connection.publish(&self.settings.topic, record.as_bytes());
            let result = tokio::time::timeout_at(deadline, publish).await;
            match result {
                Ok(Ok(())) => {
                    self.stats.add_published(1);
                    drained += 1;
                }
                Ok(Err(e)) => {
                    self.stats.add_publish_failures(1);
                    tracing::warn!(error = %e, "drain interrupted");
                    self.pending = Some(Pending { record, failures: 0 });
                    break;
                }
                Err(_) => {
                    self.connection.abandon();
                    tracing::warn!(timeout_ms = self.settings.drain_timeout.as_millis() as u64, "drain timed out");
                    self.pending = Some(Pending { record, failures: 0 });
                    break;
                }
            }
        }
        tracing::info!(drained, "drain finished");
    }
}

/// Дождаться операции на соединении с учётом отмены.
///
/// Без `grace` отмена прерывает операцию сразу. С `grace` операции даётся
/// завершиться, но не позже `deadline` (ставится в момент отмены).
/// None = операция прервана, соединение надо бросить.
async fn finish_or_cancel<T>(
    op: impl Future<Output = T>,
    token: &CancellationToken,
    grace: Option<Duration>,
    deadline: &mut Option<Instant>,
) -> Option<T> {
    tokio::pin!(op);
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            let grace = grace?;
            let deadline = *deadline.get_or_insert_with(|| Instant::now() + grace);
            tracing::debug!("cancelled mid-operation, letting it finish before drain");
            tokio::time::timeout_at(deadline, op).await.ok()
        }
        r = &mut op => Some(r),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Handle
// ═══════════════════════════════════════════════════════════════

/// Запущенный publisher.
pub struct PublisherHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PublisherHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Отменить и дождаться завершения (drain/discard + close).
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "publisher task failed");
        }
    }
}
