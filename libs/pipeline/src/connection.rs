use std::time::Duration;

use tokio::sync::watch;

use telemetry_api::{ConnectionState, TelemetryError, Transport};

/// Верхняя граница на best-effort DISCONNECT при закрытии.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

// ═══════════════════════════════════════════════════════════════
//  Sink Connection
// ═══════════════════════════════════════════════════════════════

/// Логическое соединение с брокером: state machine поверх `Transport`.
///
/// Disconnected → Connecting → Connected → Disconnected ..., из любого
/// состояния → Closing (терминальное). Все переходы публикуются в watch.
///
/// Принадлежит publisher-задаче: изменяется только из неё.
pub struct SinkConnection {
    client_id: String,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    connect_timeout: Duration,
    publish_timeout: Duration,
}

impl SinkConnection {
    pub fn new(client_id: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client_id: client_id.into(),
            transport,
            state: ConnectionState::Disconnected,
            state_tx,
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, publish: Duration) -> Self {
        self.connect_timeout = connect;
        self.publish_timeout = publish;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn peer(&self) -> String {
        self.transport.peer_info()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Подписка на смену состояний (для status-интерфейса хоста).
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), TelemetryError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(TelemetryError::InvalidTransition { from: self.state, to: next });
        }
        tracing::debug!(client_id = %self.client_id, from = %self.state, to = %next, "connection state");
        self.state = next;
        self.state_tx.send_replace(next);
        Ok(())
    }

    /// Установить соединение. Если уже Connected, ничего не делает.
    pub async fn connect(&mut self) -> Result<(), TelemetryError> {
        match self.state {
            ConnectionState::Closing => return Err(TelemetryError::ShutdownInProgress),
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
        // Connecting остаётся только от прерванной попытки
        self.transition(ConnectionState::Disconnected)?;
        self.transition(ConnectionState::Connecting)?;

        let result = match tokio::time::timeout(self.connect_timeout, self.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Transport(format!(
                "connect timed out after {}ms",
                self.connect_timeout.as_millis()
            ))),
        };

        match result {
            Ok(()) => {
                self.transition(ConnectionState::Connected)?;
                tracing::info!(client_id = %self.client_id, peer = %self.peer(), "connected");
                Ok(())
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected)?;
                Err(e)
            }
        }
    }

    /// Отправить payload. Вне Connected сразу `NotConnected`, без ожидания.
    ///
    /// Транспортная ошибка или таймаут переводят соединение в Disconnected.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TelemetryError> {
        match self.state {
            ConnectionState::Closing => return Err(TelemetryError::ShutdownInProgress),
            ConnectionState::Connected => {}
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                return Err(TelemetryError::NotConnected);
            }
        }

        let result = match tokio::time::timeout(self.publish_timeout, self.transport.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Transport(format!(
                "publish timed out after {}ms",
                self.publish_timeout.as_millis()
            ))),
        };
        self.settle(result)
    }

    /// Keep-alive в простое. Вне Connected ничего не делает.
    pub async fn keep_alive(&mut self) -> Result<(), TelemetryError> {
        if !self.is_connected() {
            return Ok(());
        }
        let result = match tokio::time::timeout(self.publish_timeout, self.transport.keep_alive()).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Transport("keep-alive timed out".into())),
        };
        self.settle(result)
    }

    fn settle(&mut self, result: Result<(), TelemetryError>) -> Result<(), TelemetryError> {
        if let Err(e) = &result {
            if e.is_transient() {
                tracing::warn!(client_id = %self.client_id, error = %e, "connection lost");
                self.transition(ConnectionState::Disconnected)?;
            }
        }
        result
    }

    /// Прерванная на полпути операция (отмена): транспорт бросает поток
    /// без I/O, соединение считается разорванным. Следующий `connect`
    /// откроет транспорт заново, `close` уже ничего не пишет.
    pub fn abandon(&mut self) {
        self.transport.reset();
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            // Connecting/Connected → Disconnected всегда разрешены
            let _ = self.transition(ConnectionState::Disconnected);
        }
    }

    /// Штатное отключение с возможностью переподключиться.
    pub async fn disconnect(&mut self) -> Result<(), TelemetryError> {
        match self.state {
            ConnectionState::Closing => Err(TelemetryError::ShutdownInProgress),
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.shutdown_transport().await;
                self.transition(ConnectionState::Disconnected)
            }
        }
    }

    /// Терминальное закрытие. Повторный вызов ничего не делает.
    pub async fn close(&mut self) -> Result<(), TelemetryError> {
        if self.state == ConnectionState::Closing {
            return Ok(());
        }
        self.transition(ConnectionState::Closing)?;
        self.shutdown_transport().await;
        tracing::info!(client_id = %self.client_id, "connection closed");
        Ok(())
    }

    async fn shutdown_transport(&mut self) {
        match tokio::time::timeout(DISCONNECT_TIMEOUT, self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(client_id = %self.client_id, error = %e, "disconnect failed"),
            Err(_) => tracing::debug!(client_id = %self.client_id, "disconnect timed out"),
        }
    }
}

impl std::fmt::Debug for SinkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConnection")
            .field("client_id", &self.client_id)
            .field("peer", &self.transport.peer_info())
            .field("state", &self.state)
            .finish()
    }
}
