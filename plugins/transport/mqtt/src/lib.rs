//! MQTT 3.1.1 transport (publish-only) over plain TCP.

pub mod broker;
pub mod packet;

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use telemetry_api::{QoS, TelemetryError, Transport, TransportFuture};

pub use broker::BrokerAddr;
use packet::{ConnectReturnCode, Incoming};

/// Параметры MQTT-сессии.
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub broker: BrokerAddr,
    pub client_id: String,
    pub qos: QoS,
    /// Интервал keep-alive, объявляемый брокеру. Zero = выключен.
    pub keep_alive: Duration,
    pub clean_session: bool,
}

impl MqttOptions {
    pub fn new(broker: BrokerAddr, client_id: impl Into<String>) -> Self {
        Self {
            broker,
            client_id: client_id.into(),
            qos: QoS::AtLeastOnce,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
        }
    }
}

pub struct MqttTransport {
    options: MqttOptions,
    stream: Option<TcpStream>,
    next_packet_id: u16,
    last_activity: Instant,
    buf: Vec<u8>,
}

impl MqttTransport {
    pub fn new(options: MqttOptions) -> Self {
        Self {
            options,
            stream: None,
            next_packet_id: 0,
            last_activity: Instant::now(),
            buf: Vec::with_capacity(256),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// 1..=65535, ноль зарезервирован протоколом.
    fn next_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }

    async fn open(&mut self) -> Result<(), TelemetryError> {
        // Повторный connect всегда начинает с чистого сокета
        self.stream = None;

        let addr = self.options.broker.socket_addr();
        let mut stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;

        let keep_alive_secs = u16::try_from(self.options.keep_alive.as_secs()).unwrap_or(u16::MAX);
        self.buf.clear();
        packet::encode_connect(
            &self.options.client_id,
            keep_alive_secs,
            self.options.clean_session,
            &mut self.buf,
        )?;
        stream.write_all(&self.buf).await?;

        let (header, body) = packet::read_packet(&mut stream).await?;
        match packet::decode_incoming(header, &body)? {
            Incoming::ConnAck(ack) if ack.return_code == ConnectReturnCode::Accepted => {
                tracing::debug!(
                    broker = %self.options.broker,
                    client_id = %self.options.client_id,
                    session_present = ack.session_present,
                    "CONNACK accepted"
                );
            }
            Incoming::ConnAck(ack) => {
                return Err(TelemetryError::Protocol(format!(
                    "broker refused connection: {}",
                    ack.return_code
                )));
            }
            other => {
                return Err(TelemetryError::Protocol(format!(
                    "expected CONNACK, got {other:?}"
                )));
            }
        }

        self.stream = Some(stream);
        self.last_activity = Instant::now();
        Ok(())
    }

    async fn send_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TelemetryError> {
        if self.stream.is_none() {
            return Err(TelemetryError::NotConnected);
        }

        let qos = self.options.qos;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.next_packet_id()),
        };
        self.buf.clear();
        packet::encode_publish(topic, payload, qos, packet_id, &mut self.buf)?;

        let Some(stream) = self.stream.as_mut() else {
            return Err(TelemetryError::NotConnected);
        };
        let result = write_and_confirm(stream, &self.buf, packet_id).await;
        self.settle(result)
    }

    async fn ping(&mut self) -> Result<(), TelemetryError> {
        let interval = self.options.keep_alive;
        if interval.is_zero() || self.last_activity.elapsed() < interval / 2 {
            return Ok(());
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(TelemetryError::NotConnected);
        };
        self.buf.clear();
        packet::encode_pingreq(&mut self.buf);
        let result = write_and_await_pingresp(stream, &self.buf).await;
        self.settle(result)
    }

    async fn close(&mut self) -> Result<(), TelemetryError> {
        if let Some(mut stream) = self.stream.take() {
            self.buf.clear();
            packet::encode_disconnect(&mut self.buf);
            // Брокер мог уже закрыть сокет, DISCONNECT best-effort
            if let Err(e) = stream.write_all(&self.buf).await {
                tracing::debug!(broker = %self.options.broker, error = %e, "DISCONNECT not delivered");
            }
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    /// После ошибки ввода-вывода сокет больше не используется.
    fn settle(&mut self, result: Result<(), TelemetryError>) -> Result<(), TelemetryError> {
        match &result {
            Ok(()) => self.last_activity = Instant::now(),
            Err(_) => self.stream = None,
        }
        result
    }
}

async fn write_and_confirm(
    stream: &mut TcpStream,
    bytes: &[u8],
    packet_id: Option<u16>,
) -> Result<(), TelemetryError> {
    stream.write_all(bytes).await?;

    let Some(expected) = packet_id else {
        return Ok(());
    };
    loop {
        let (header, body) = packet::read_packet(stream).await?;
        match packet::decode_incoming(header, &body)? {
            Incoming::PubAck { packet_id } if packet_id == expected => return Ok(()),
            Incoming::PubAck { packet_id } => {
                tracing::debug!(expected, packet_id, "stale PUBACK, ignoring");
            }
            Incoming::PingResp => {}
            Incoming::ConnAck(_) => {
                return Err(TelemetryError::Protocol("unexpected CONNACK".into()));
            }
            Incoming::Other(packet_type) => {
                tracing::debug!(packet_type, "ignoring inbound packet");
            }
        }
    }
}

async fn write_and_await_pingresp(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), TelemetryError> {
    stream.write_all(bytes).await?;
    loop {
        let (header, body) = packet::read_packet(stream).await?;
        match packet::decode_incoming(header, &body)? {
            Incoming::PingResp => return Ok(()),
            Incoming::ConnAck(_) => {
                return Err(TelemetryError::Protocol("unexpected CONNACK".into()));
            }
            other => tracing::debug!(packet = ?other, "ignoring packet while waiting for PINGRESP"),
        }
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> TransportFuture<'_> {
        Box::pin(self.open())
    }

    fn publish<'a>(&'a mut self, topic: &'a str, payload: &'a [u8]) -> TransportFuture<'a> {
        Box::pin(self.send_publish(topic, payload))
    }

    fn keep_alive(&mut self) -> TransportFuture<'_> {
        Box::pin(self.ping())
    }

    fn disconnect(&mut self) -> TransportFuture<'_> {
        Box::pin(self.close())
    }

    fn reset(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(broker = %self.options.broker, "stream dropped without DISCONNECT");
        }
    }

    fn peer_info(&self) -> String {
        self.options.broker.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> MqttTransport {
        let broker: BrokerAddr = "tcp://127.0.0.1:1".parse().unwrap();
        MqttTransport::new(MqttOptions::new(broker, "test-client"))
    }

    #[test]
    fn test_packet_id_skips_zero() {
        let mut t = transport();
        assert_eq!(t.next_packet_id(), 1);
        t.next_packet_id = u16::MAX;
        assert_eq!(t.next_packet_id(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_connect_is_not_connected() {
        let mut t = transport();
        let err = t.publish("t", b"{}").await.unwrap_err();
        assert_eq!(err, TelemetryError::NotConnected);
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_disconnect_when_closed_is_noop() {
        let mut t = transport();
        t.disconnect().await.unwrap();
        assert_eq!(t.peer_info(), "tcp://127.0.0.1:1");
    }
}
