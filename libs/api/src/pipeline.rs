use std::future::Future;
use std::pin::Pin;

use crate::{Sample, TelemetryError, WireRecord};

/// Future, возвращаемый методами транспорта.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Sampling Source
// ════════════════════════════════════════════════════════════════

/// Источник показаний (pull-модель). Хост адаптирует платформенный API
/// сенсора к этому трейту; жизненным циклом источника владеет хост.
pub trait SampleSource: Send {
    /// Прочитать текущее показание. None = показаний пока нет.
    fn read(&mut self) -> Option<Sample>;
}

// ════════════════════════════════════════════════════════════════
//  Codec
// ════════════════════════════════════════════════════════════════

/// Serializer: Sample ↔ WireRecord.
///
/// `serialize` детерминирован, `deserialize` нужен для проверки round-trip.
pub trait SampleCodec: Send + Sync {
    fn serialize(&self, sample: &Sample) -> Result<WireRecord, TelemetryError>;

    fn deserialize(&self, record: &WireRecord) -> Result<Sample, TelemetryError>;
}

// ════════════════════════════════════════════════════════════════
//  Transport
// ════════════════════════════════════════════════════════════════

/// Сетевой транспорт до брокера. Владелец: SinkConnection, вызывается
/// только из publisher-задачи.
///
/// Ошибки ввода-вывода возвращаются как `TelemetryError::Transport`,
/// отказ брокера как `TelemetryError::Protocol`.
pub trait Transport: Send {
    /// Установить соединение и выполнить handshake.
    fn connect(&mut self) -> TransportFuture<'_>;

    /// Отправить payload в topic.
    fn publish<'a>(&'a mut self, topic: &'a str, payload: &'a [u8]) -> TransportFuture<'a>;

    /// Поддержание соединения в простое (MQTT PINGREQ и т.п.).
    fn keep_alive(&mut self) -> TransportFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    /// Корректно закрыть соединение.
    fn disconnect(&mut self) -> TransportFuture<'_>;

    /// Бросить соединение без I/O. Вызывается после прерванной на полпути
    /// операции: поток мог остаться посреди пакета, писать в него нельзя.
    fn reset(&mut self) {}

    /// Описание удалённой стороны (для логирования).
    fn peer_info(&self) -> String {
        "unknown".into()
    }
}
