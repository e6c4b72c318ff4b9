use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use telemetry_api::{QoS, TelemetryError, Transport};
use transport_mqtt::packet::{self, PacketType};
use transport_mqtt::{BrokerAddr, MqttOptions, MqttTransport};

/// Что получил брокер от клиента за одну сессию.
#[derive(Debug, Default)]
struct Session {
    client_id: String,
    keep_alive: u16,
    publishes: Vec<(String, Vec<u8>, u8)>,
    pings: usize,
    disconnected: bool,
}

async fn bind() -> (TcpListener, BrokerAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let addr = format!("tcp://127.0.0.1:{port}").parse().unwrap();
    (listener, addr)
}

fn options(broker: BrokerAddr, qos: QoS) -> MqttOptions {
    let mut opts = MqttOptions::new(broker, "accel-test");
    opts.qos = qos;
    opts
}

/// Принять одно соединение, ответить CONNACK с `return_code`,
/// дальше подтверждать PUBLISH/PINGREQ до DISCONNECT или EOF.
fn serve_one(listener: TcpListener, return_code: u8) -> JoinHandle<Session> {
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut session = Session::default();

        let (header, body) = packet::read_packet(&mut stream).await.unwrap();
        assert_eq!(header >> 4, PacketType::Connect as u8);
        // 2+4 name, level, flags, keep alive, then client id
        assert_eq!(&body[2..6], b"MQTT");
        assert_eq!(body[6], 4);
        session.keep_alive = u16::from_be_bytes([body[8], body[9]]);
        let id_len = u16::from_be_bytes([body[10], body[11]]) as usize;
        session.client_id = String::from_utf8(body[12..12 + id_len].to_vec()).unwrap();

        stream.write_all(&[0x20, 0x02, 0x00, return_code]).await.unwrap();
        if return_code != 0 {
            return session;
        }

        loop {
            let (header, body) = match packet::read_packet(&mut stream).await {
                Ok(p) => p,
                Err(_) => break,
            };
            match header >> 4 {
                t if t == PacketType::Publish as u8 => {
                    let qos = (header >> 1) & 0b11;
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                    let mut offset = 2 + topic_len;
                    if qos == 1 {
                        let pid = [body[offset], body[offset + 1]];
                        offset += 2;
                        stream.write_all(&[0x40, 0x02, pid[0], pid[1]]).await.unwrap();
                    }
                    session.publishes.push((topic, body[offset..].to_vec(), qos));
                }
                t if t == PacketType::PingReq as u8 => {
                    session.pings += 1;
                    stream.write_all(&[0xD0, 0x00]).await.unwrap();
                }
                t if t == PacketType::Disconnect as u8 => {
                    session.disconnected = true;
                    break;
                }
                other => panic!("unexpected packet type {other}"),
            }
        }
        session
    })
}

#[tokio::test]
async fn test_connect_publish_qos1_disconnect() {
    let (listener, broker) = bind().await;
    let broker_task = serve_one(listener, 0);

    let mut transport = MqttTransport::new(options(broker, QoS::AtLeastOnce));
    transport.connect().await.unwrap();
    assert!(transport.is_open());

    transport.publish("android/sensors", br#"{"x":1.0}"#).await.unwrap();
    transport.publish("android/sensors", br#"{"x":2.0}"#).await.unwrap();
    transport.disconnect().await.unwrap();
    assert!(!transport.is_open());

    let session = broker_task.await.unwrap();
    assert_eq!(session.client_id, "accel-test");
    assert_eq!(session.keep_alive, 60);
    assert!(session.disconnected);
    assert_eq!(
        session.publishes,
        vec![
            ("android/sensors".to_string(), br#"{"x":1.0}"#.to_vec(), 1),
            ("android/sensors".to_string(), br#"{"x":2.0}"#.to_vec(), 1),
        ]
    );
}

#[tokio::test]
async fn test_publish_qos0_does_not_wait_for_ack() {
    let (listener, broker) = bind().await;
    let broker_task = serve_one(listener, 0);

    let mut transport = MqttTransport::new(options(broker, QoS::AtMostOnce));
    transport.connect().await.unwrap();
    transport.publish("t", b"payload").await.unwrap();
    transport.disconnect().await.unwrap();

    let session = broker_task.await.unwrap();
    assert_eq!(session.publishes, vec![("t".to_string(), b"payload".to_vec(), 0)]);
}

#[tokio::test]
async fn test_refused_connack_is_protocol_error() {
    let (listener, broker) = bind().await;
    let broker_task = serve_one(listener, 5);

    let mut transport = MqttTransport::new(options(broker, QoS::AtLeastOnce));
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, TelemetryError::Protocol(ref m) if m.contains("not authorized")), "{err:?}");
    assert!(!transport.is_open());
    broker_task.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused_socket_is_transport_error() {
    // Занять порт и сразу освободить: на нём никто не слушает
    let (listener, broker) = bind().await;
    drop(listener);

    let mut transport = MqttTransport::new(options(broker, QoS::AtLeastOnce));
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, TelemetryError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn test_broker_closing_socket_fails_publish_and_drops_stream() {
    let (listener, broker) = bind().await;
    let broker_task = tokio::spawn(async move {
        let (mut stream, _): (TcpStream, _) = listener.accept().await.unwrap();
        packet::read_packet(&mut stream).await.unwrap();
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        // закрыть сразу после CONNACK
    });

    let mut transport = MqttTransport::new(options(broker, QoS::AtLeastOnce));
    transport.connect().await.unwrap();
    broker_task.await.unwrap();

    let err = transport.publish("t", b"x").await.unwrap_err();
    assert!(err.is_transient(), "{err:?}");
    assert!(!transport.is_open());
    assert_eq!(transport.publish("t", b"x").await.unwrap_err(), TelemetryError::NotConnected);
}

#[tokio::test]
async fn test_keep_alive_sends_pingreq_when_idle() {
    let (listener, broker) = bind().await;
    let broker_task = serve_one(listener, 0);

    let mut opts = options(broker, QoS::AtMostOnce);
    opts.keep_alive = Duration::from_millis(40);
    let mut transport = MqttTransport::new(opts);
    transport.connect().await.unwrap();

    // свежее соединение, пинг не нужен
    transport.keep_alive().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    transport.keep_alive().await.unwrap();
    transport.disconnect().await.unwrap();

    let session = broker_task.await.unwrap();
    assert_eq!(session.keep_alive, 0, "sub-second keep alive is announced as 0 seconds");
    assert_eq!(session.pings, 1);
}

#[tokio::test]
async fn test_reset_drops_stream_without_disconnect() {
    let (listener, broker) = bind().await;
    let broker_task = serve_one(listener, 0);

    let mut transport = MqttTransport::new(options(broker, QoS::AtMostOnce));
    transport.connect().await.unwrap();
    transport.publish("t", b"one").await.unwrap();

    transport.reset();
    assert!(!transport.is_open());
    // после reset закрывать уже нечего
    transport.disconnect().await.unwrap();

    let session = broker_task.await.unwrap();
    assert_eq!(session.publishes, vec![("t".to_string(), b"one".to_vec(), 0)]);
    assert!(!session.disconnected, "DISCONNECT written after reset");
}
