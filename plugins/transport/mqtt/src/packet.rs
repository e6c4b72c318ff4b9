//! Minimal MQTT 3.1.1 client-side packet codec.
//!
//! Only what a publish-only client needs: CONNECT, PUBLISH (QoS 0/1),
//! PINGREQ and DISCONNECT outbound; CONNACK, PUBACK and PINGRESP inbound.

use tokio::io::{AsyncRead, AsyncReadExt};

use telemetry_api::{QoS, TelemetryError};

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// MQTT limits the remaining length to 268,435,455 (4 var-int bytes).
pub const MAX_VARIABLE_LENGTH: usize = 268_435_455;

/// Верхняя граница тела входящего пакета. Клиенту приходят только
/// CONNACK/PUBACK/PINGRESP, всё крупнее считается нарушением протокола.
pub const MAX_INCOMING_BODY: usize = 64 * 1024;

const CLEAN_SESSION: u8 = 0b0000_0010;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    const fn header_byte(self, flags: u8) -> u8 {
        ((self as u8) << 4) | (flags & 0x0F)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = TelemetryError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUserNameOrPassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            other => Err(TelemetryError::Protocol(format!("unknown CONNACK return code {other}"))),
        }
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectReturnCode::Accepted => "accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadUserNameOrPassword => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

/// Packets a publish-only client expects from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    ConnAck(ConnAck),
    PubAck { packet_id: u16 },
    PingResp,
    /// Anything else; carries the packet type nibble.
    Other(u8),
}

// ═══════════════════════════════════════════════════════════════
//  Primitives
// ═══════════════════════════════════════════════════════════════

pub fn write_variable_length(value: usize, buf: &mut Vec<u8>) -> Result<(), TelemetryError> {
    if value > MAX_VARIABLE_LENGTH {
        return Err(TelemetryError::Serialization(format!(
            "packet too large: remaining length {value} exceeds {MAX_VARIABLE_LENGTH}"
        )));
    }

    let mut encoded = value;
    loop {
        let mut byte = (encoded & 0x7F) as u8;
        encoded >>= 7;
        if encoded > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if encoded == 0 {
            break;
        }
    }
    Ok(())
}

/// Decode a remaining-length var-int.
///
/// Returns `(value, bytes_read)`, or `None` if `bytes` ends mid-encoding.
pub fn decode_variable_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, TelemetryError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, &byte) in bytes.iter().enumerate() {
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        if i == 3 {
            return Err(TelemetryError::Protocol("malformed remaining length".into()));
        }
        multiplier *= 128;
    }
    Ok(None)
}

fn write_string(s: &str, buf: &mut Vec<u8>) -> Result<(), TelemetryError> {
    let len = u16::try_from(s.len())
        .map_err(|_| TelemetryError::Config(format!("string too long for MQTT: {} bytes", s.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Outbound
// ═══════════════════════════════════════════════════════════════

/// Fixed Header
///   byte 1:  0x10
///   bytes :  Remaining Length (var-int)
///
/// Variable Header
///   Protocol Name ("MQTT"), Protocol Level (4), Connect Flags, Keep Alive
///
/// Payload
///   Client Identifier (no will, no credentials)
pub fn encode_connect(
    client_id: &str,
    keep_alive_secs: u16,
    clean_session: bool,
    buf: &mut Vec<u8>,
) -> Result<(), TelemetryError> {
    let remaining_length = 2 + PROTOCOL_NAME.len() // Protocol Name
        + 1 // Protocol Level
        + 1 // Connect Flags
        + 2 // Keep Alive
        + 2 + client_id.len(); // Client ID

    buf.push(PacketType::Connect.header_byte(0));
    write_variable_length(remaining_length, buf)?;
    write_string(PROTOCOL_NAME, buf)?;
    buf.push(PROTOCOL_LEVEL);
    buf.push(if clean_session { CLEAN_SESSION } else { 0 });
    buf.extend_from_slice(&keep_alive_secs.to_be_bytes());
    write_string(client_id, buf)?;
    Ok(())
}

/// PUBLISH with dup = 0, retain = 0. `packet_id` is required for QoS 1.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
    buf: &mut Vec<u8>,
) -> Result<(), TelemetryError> {
    let mut remaining_length = 2 + topic.len() + payload.len();
    if qos != QoS::AtMostOnce {
        remaining_length += 2;
    }

    buf.push(PacketType::Publish.header_byte((qos as u8) << 1));
    write_variable_length(remaining_length, buf)?;
    write_string(topic, buf)?;
    if qos != QoS::AtMostOnce {
        let pid = packet_id
            .filter(|id| *id != 0)
            .ok_or_else(|| TelemetryError::Protocol("QoS 1 publish requires a non-zero packet id".into()))?;
        buf.extend_from_slice(&pid.to_be_bytes());
    }
    buf.extend_from_slice(payload);
    Ok(())
}

pub fn encode_pingreq(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[PacketType::PingReq.header_byte(0), 0x00]);
}

pub fn encode_disconnect(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[PacketType::Disconnect.header_byte(0), 0x00]);
}

// ═══════════════════════════════════════════════════════════════
//  Inbound
// ═══════════════════════════════════════════════════════════════

/// Read one packet: returns the fixed header byte and the body
/// (everything after the remaining length).
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u8, Vec<u8>), TelemetryError> {
    let header = read_byte(reader).await?;

    let mut len_bytes = [0u8; 4];
    let mut n = 0;
    let remaining = loop {
        len_bytes[n] = read_byte(reader).await?;
        n += 1;
        if let Some((value, _)) = decode_variable_length(&len_bytes[..n])? {
            break value;
        }
    };
    if remaining > MAX_INCOMING_BODY {
        return Err(TelemetryError::Protocol(format!(
            "inbound packet too large: {remaining} bytes (limit {MAX_INCOMING_BODY})"
        )));
    }

    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await.map_err(closed_by_peer)?;
    Ok((header, body))
}

pub fn decode_incoming(header: u8, body: &[u8]) -> Result<Incoming, TelemetryError> {
    let packet_type = header >> 4;
    match packet_type {
        t if t == PacketType::ConnAck as u8 => {
            if body.len() != 2 {
                return Err(TelemetryError::Protocol(format!(
                    "CONNACK remaining length {} (expected 2)",
                    body.len()
                )));
            }
            Ok(Incoming::ConnAck(ConnAck {
                session_present: body[0] & 0x01 != 0,
                return_code: ConnectReturnCode::try_from(body[1])?,
            }))
        }
        t if t == PacketType::PubAck as u8 => {
            if body.len() != 2 {
                return Err(TelemetryError::Protocol(format!(
                    "PUBACK remaining length {} (expected 2)",
                    body.len()
                )));
            }
            Ok(Incoming::PubAck {
                packet_id: u16::from_be_bytes([body[0], body[1]]),
            })
        }
        t if t == PacketType::PingResp as u8 => Ok(Incoming::PingResp),
        other => Ok(Incoming::Other(other)),
    }
}

async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, TelemetryError> {
    reader.read_u8().await.map_err(closed_by_peer)
}

fn closed_by_peer(e: std::io::Error) -> TelemetryError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TelemetryError::Transport("connection closed by broker".into())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_len(value: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        write_variable_length(value, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_variable_length_boundaries() {
        assert_eq!(var_len(0), [0x00]);
        assert_eq!(var_len(127), [0x7F]);
        assert_eq!(var_len(128), [0x80, 0x01]);
        assert_eq!(var_len(16_383), [0xFF, 0x7F]);
        assert_eq!(var_len(16_384), [0x80, 0x80, 0x01]);
        assert_eq!(var_len(MAX_VARIABLE_LENGTH), [0xFF, 0xFF, 0xFF, 0x7F]);

        let mut buf = Vec::new();
        assert!(write_variable_length(MAX_VARIABLE_LENGTH + 1, &mut buf).is_err());
    }

    #[test]
    fn test_decode_variable_length() {
        assert_eq!(decode_variable_length(&[0x00]).unwrap(), Some((0, 1)));
        assert_eq!(decode_variable_length(&[0x80, 0x01, 0xAA]).unwrap(), Some((128, 2)));
        assert_eq!(
            decode_variable_length(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            Some((MAX_VARIABLE_LENGTH, 4))
        );
        // incomplete
        assert_eq!(decode_variable_length(&[0x80]).unwrap(), None);
        assert_eq!(decode_variable_length(&[]).unwrap(), None);
        // five-byte encoding is malformed
        assert!(decode_variable_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]).is_err());
    }

    #[test]
    fn test_encode_connect() {
        let mut buf = Vec::new();
        encode_connect("c1", 60, true, &mut buf).unwrap();
        assert_eq!(
            buf,
            [
                0x10, 0x0E, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x02, // clean session
                0x00, 0x3C, // keep alive 60
                0x00, 0x02, b'c', b'1', // client id
            ]
        );
    }

    #[test]
    fn test_encode_publish_qos0() {
        let mut buf = Vec::new();
        encode_publish("a/b", b"hi", QoS::AtMostOnce, None, &mut buf).unwrap();
        assert_eq!(buf, [0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_encode_publish_qos1() {
        let mut buf = Vec::new();
        encode_publish("a/b", b"hi", QoS::AtLeastOnce, Some(10), &mut buf).unwrap();
        assert_eq!(
            buf,
            [0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x0A, b'h', b'i']
        );
    }

    #[test]
    fn test_encode_publish_qos1_requires_packet_id() {
        let mut buf = Vec::new();
        assert!(encode_publish("t", b"x", QoS::AtLeastOnce, None, &mut buf).is_err());
        assert!(encode_publish("t", b"x", QoS::AtLeastOnce, Some(0), &mut buf).is_err());
    }

    #[test]
    fn test_fixed_size_packets() {
        let mut buf = Vec::new();
        encode_pingreq(&mut buf);
        encode_disconnect(&mut buf);
        assert_eq!(buf, [0xC0, 0x00, 0xE0, 0x00]);
    }

    #[test]
    fn test_decode_connack() {
        assert_eq!(
            decode_incoming(0x20, &[0x00, 0x00]).unwrap(),
            Incoming::ConnAck(ConnAck {
                session_present: false,
                return_code: ConnectReturnCode::Accepted,
            })
        );
        assert_eq!(
            decode_incoming(0x20, &[0x01, 0x05]).unwrap(),
            Incoming::ConnAck(ConnAck {
                session_present: true,
                return_code: ConnectReturnCode::NotAuthorized,
            })
        );
        assert!(decode_incoming(0x20, &[0x00]).is_err());
        assert!(decode_incoming(0x20, &[0x00, 0x09]).is_err());
    }

    #[test]
    fn test_decode_puback_and_pingresp() {
        assert_eq!(
            decode_incoming(0x40, &[0x01, 0x02]).unwrap(),
            Incoming::PubAck { packet_id: 0x0102 }
        );
        assert_eq!(decode_incoming(0xD0, &[]).unwrap(), Incoming::PingResp);
        assert_eq!(decode_incoming(0x30, b"whatever").unwrap(), Incoming::Other(3));
    }

    #[tokio::test]
    async fn test_read_packet_from_stream() {
        let bytes: &[u8] = &[0x40, 0x02, 0x00, 0x07, 0xD0, 0x00];
        let mut reader = bytes;
        let (header, body) = read_packet(&mut reader).await.unwrap();
        assert_eq!((header, body.as_slice()), (0x40, &[0x00, 0x07][..]));
        let (header, body) = read_packet(&mut reader).await.unwrap();
        assert_eq!((header, body.len()), (0xD0, 0));

        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_read_packet_rejects_oversized_body() {
        // заявлено 256 MiB - 1, а байтов тела нет вовсе
        let bytes: &[u8] = &[0x30, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut reader = bytes;
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Protocol(ref m) if m.contains("too large")), "{err:?}");

        let mut at_limit = vec![0x30];
        write_variable_length(MAX_INCOMING_BODY, &mut at_limit).unwrap();
        at_limit.resize(at_limit.len() + MAX_INCOMING_BODY, 0);
        let mut reader = at_limit.as_slice();
        let (_, body) = read_packet(&mut reader).await.unwrap();
        assert_eq!(body.len(), MAX_INCOMING_BODY);
    }

    #[tokio::test]
    async fn test_read_packet_truncated_body() {
        let bytes: &[u8] = &[0x20, 0x02, 0x00];
        let mut reader = bytes;
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(TelemetryError::Transport(_))
        ));
    }
}
