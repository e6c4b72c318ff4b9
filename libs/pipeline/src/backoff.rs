use std::time::Duration;

/// Экспоненциальная задержка между попытками подключения:
/// `min * 2^attempt`, ограничена сверху `max`. Без jitter: задержка
/// не убывает, пока не будет `reset()`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min), attempt: 0 }
    }

    /// Задержка для попытки с номером `attempt` (с нуля).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^31 * 1ms уже больше любого разумного max
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.min.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Задержка перед следующей попыткой; счётчик попыток растёт.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Сброс после успешного подключения.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Сколько неудачных попыток подряд.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
