use serde::{Deserialize, Serialize};

use crate::util::now_ms;

// ════════════════════════════════════════════════════════════════
//  Sample
// ════════════════════════════════════════════════════════════════

/// Одно показание акселерометра с меткой времени.
///
/// Неизменяемо после создания: поля доступны только на чтение.
/// Порядок полей определяет порядок ключей в JSON (x, y, z, timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    x: f64,
    y: f64,
    z: f64,
    /// Unix-время в миллисекундах.
    timestamp: i64,
}

impl Sample {
    pub fn new(x: f64, y: f64, z: f64, timestamp: i64) -> Self {
        Self { x, y, z, timestamp }
    }

    /// Показание с текущим wall-clock временем.
    pub fn now(x: f64, y: f64, z: f64) -> Self {
        Self::new(x, y, z, now_ms())
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Все три оси конечны (NaN и ±inf не представимы в JSON).
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Текст для отображения последнего показания, по оси на строку.
    pub fn display_text(&self) -> String {
        format!("X: {:.2}\nY: {:.2}\nZ: {:.2}", self.x, self.y, self.z)
    }
}

// ════════════════════════════════════════════════════════════════
//  WireRecord
// ════════════════════════════════════════════════════════════════

/// Сериализованный Sample в wire-формате. Для транспорта это opaque байты.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRecord {
    bytes: Vec<u8>,
}

impl WireRecord {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for WireRecord {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl std::fmt::Display for WireRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

// ════════════════════════════════════════════════════════════════
//  Connection State
// ════════════════════════════════════════════════════════════════

/// Состояние логического соединения с брокером.
///
/// Меняется только через разрешённые переходы (см. `can_transition_to`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Терминальное состояние после запроса shutdown.
    Closing,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Closing)
                | (Connecting, Closing)
                | (Connected, Closing)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closing
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Closing => f.write_str("closing"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  QoS
// ════════════════════════════════════════════════════════════════

/// Уровень гарантии доставки транспорта. QoS 2 не поддерживается.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    #[default]
    AtLeastOnce = 1,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(format!("unsupported qos {other} (expected 0 or 1)")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos as u8
    }
}
