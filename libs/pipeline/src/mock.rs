//! In-memory Transport для тестов publisher'а и соединения.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use telemetry_api::{TelemetryError, Transport, TransportFuture};

#[derive(Debug, Default)]
struct MockState {
    reachable: bool,
    connected: bool,
    fail_publishes: usize,
    publish_delay: Duration,
    published: Vec<Vec<u8>>,
    connect_times: Vec<Instant>,
    keep_alives: usize,
    disconnects: usize,
    resets: usize,
}

/// Клоны делят одно состояние: тест держит клон, publisher владеет оригиналом.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn reachable() -> Self {
        let mock = Self::default();
        mock.set_reachable(true);
        mock
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        let mut s = self.state.lock().unwrap();
        s.reachable = reachable;
        if !reachable {
            s.connected = false;
        }
    }

    pub fn fail_next_publishes(&self, n: usize) {
        self.state.lock().unwrap().fail_publishes = n;
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        self.state.lock().unwrap().publish_delay = delay;
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_times.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().connect_times.clone()
    }

    pub fn keep_alives(&self) -> usize {
        self.state.lock().unwrap().keep_alives
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> TransportFuture<'_> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut s = state.lock().unwrap();
            s.connect_times.push(Instant::now());
            if s.reachable {
                s.connected = true;
                Ok(())
            } else {
                Err(TelemetryError::Transport("connection refused".into()))
            }
        })
    }

    fn publish<'a>(&'a mut self, _topic: &'a str, payload: &'a [u8]) -> TransportFuture<'a> {
        let state = self.state.clone();
        let delay = state.lock().unwrap().publish_delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut s = state.lock().unwrap();
            if !s.connected {
                return Err(TelemetryError::Transport("broken pipe".into()));
            }
            if s.fail_publishes > 0 {
                s.fail_publishes -= 1;
                s.connected = false;
                return Err(TelemetryError::Transport("connection reset".into()));
            }
            s.published.push(payload.to_vec());
            Ok(())
        })
    }

    fn keep_alive(&mut self) -> TransportFuture<'_> {
        let state = self.state.clone();
        Box::pin(async move {
            state.lock().unwrap().keep_alives += 1;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut s = state.lock().unwrap();
            s.connected = false;
            s.disconnects += 1;
            Ok(())
        })
    }

    fn reset(&mut self) {
        let mut s = self.state.lock().unwrap();
        s.connected = false;
        s.resets += 1;
    }

    fn peer_info(&self) -> String {
        "mock://broker".into()
    }
}
