//! Duplex connection manager.
//!
//! DESIGN
//! ======
//! One `ConnectionManager` per user session owns the single live channel.
//! It is injected wherever a channel is needed; there is no global socket.
//! Timers are explicit task handles stored next to the channel they serve:
//!
//! - heartbeat: one per open channel, aborted whenever that channel goes away
//! - reconnect: at most one pending at a time, aborted by `disconnect`
//!
//! The transport sits behind [`Dialer`] so the lifecycle rules can be driven
//! by an in-memory channel in tests; [`WsDialer`] is the tokio-tungstenite
//! implementation used at runtime.
//!
//! LIFECYCLE
//! =========
//! 1. `connect` → `Connecting` → dial → `Connected`, heartbeat starts
//! 2. Inbound text frames → router
//! 3. Close 1000/1001 → `Disconnected`, nothing scheduled
//! 4. Any other close → `Disconnected`, one reconnect after a fixed delay
//! 5. Dial failure from `connect` → `Error`, nothing scheduled
//! 6. Dial failure from the reconnect timer → `Error`, next attempt scheduled
//!    until the optional ceiling is spent (the count resets on success)
//! 7. `disconnect` → cancel both timers, close 1000, `Disconnected`

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::message::ping_frame;
use super::router::MessageRouter;
use crate::config::ConnectionSettings;
use crate::error::ClientError;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Event delivered by a transport to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Text(String),
    Closed { code: u16, reason: String },
}

/// Frame handed by the manager to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16 },
}

/// Both halves of an open duplex channel.
pub struct DuplexChannel {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens duplex channels.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<DuplexChannel, ClientError>;
}

/// WebSocket transport backed by tokio-tungstenite.
pub struct WsDialer;

#[async_trait::async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<DuplexChannel, ClientError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Channel(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ChannelEvent>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    OutboundFrame::Close { code } => {
                        let close = CloseFrame { code: CloseCode::from(code), reason: "".into() };
                        let _ = sink.send(Message::Close(Some(close))).await;
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut code = CLOSE_ABNORMAL;
            let mut reason = String::new();
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(ChannelEvent::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            code = u16::from(frame.code);
                            reason = frame.reason.as_str().to_owned();
                        } else {
                            code = CLOSE_NO_STATUS;
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket receive failed");
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(ChannelEvent::Closed { code, reason });
        });

        Ok(DuplexChannel { outbound: outbound_tx, inbound: inbound_rx })
    }
}

/// Where a channel points: address prefix plus the correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub correlation_id: String,
}

impl Target {
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/{}", self.address.trim_end_matches('/'), self.correlation_id)
    }
}

/// Close codes that end a session on purpose and must not trigger a reconnect.
#[must_use]
pub fn is_normal_close(code: u16) -> bool {
    matches!(code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
}

#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    dialer: Arc<dyn Dialer>,
    router: Arc<MessageRouter>,
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    target: Option<Target>,
    session: Option<Session>,
    reconnect: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
    auto_reconnect: bool,
    /// Bumped by every connect attempt and every disconnect; a dial that
    /// finishes under a different epoch was superseded.
    epoch: u64,
    last_activity: Option<OffsetDateTime>,
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Session {
    fn shutdown(self, close_code: Option<u16>) {
        self.heartbeat.abort();
        self.reader.abort();
        if let Some(code) = close_code {
            let _ = self.outbound.send(OutboundFrame::Close { code });
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = inner.reconnect.take() {
            handle.abort();
        }
        if let Some(session) = inner.session.take() {
            session.shutdown(Some(CLOSE_GOING_AWAY));
        }
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(dialer: Arc<dyn Dialer>, router: Arc<MessageRouter>, settings: ConnectionSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                dialer,
                router,
                settings,
                state: watch::channel(ConnectionState::Disconnected).0,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Manager backed by the real WebSocket transport.
    #[must_use]
    pub fn websocket(router: Arc<MessageRouter>, settings: ConnectionSettings) -> Self {
        Self::new(Arc::new(WsDialer), router, settings)
    }

    /// Open the channel to `address/correlation_id`.
    ///
    /// No-op when a channel is already open or opening.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when the transport cannot open; the
    /// manager moves to [`ConnectionState::Error`] and schedules nothing.
    pub async fn connect(&self, address: &str, correlation_id: &str) -> Result<(), ClientError> {
        let target = Target { address: address.to_owned(), correlation_id: correlation_id.to_owned() };
        self.open(target, false).await
    }

    /// Dial `target`. A failed dial started by the reconnect timer schedules
    /// the next attempt; a failed caller-initiated dial schedules nothing.
    async fn open(&self, target: Target, from_timer: bool) -> Result<(), ClientError> {
        let attempt = {
            let mut inner = self.lock();
            if from_timer {
                inner.reconnect = None;
                if !inner.auto_reconnect {
                    return Ok(());
                }
            }
            if matches!(self.state(), ConnectionState::Connected | ConnectionState::Connecting) {
                tracing::debug!(url = %target.url(), "connect ignored; channel already open");
                return Ok(());
            }
            if let Some(stale) = inner.session.take() {
                stale.shutdown(Some(CLOSE_NORMAL));
            }
            inner.epoch += 1;
            inner.target = Some(target.clone());
            inner.auto_reconnect = true;
            self.set_state(ConnectionState::Connecting);
            inner.epoch
        };

        let url = target.url();
        tracing::info!(%url, "opening duplex channel");
        let channel = match self.shared.dialer.dial(&url).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(%url, error = %e, "duplex channel failed to open");
                let mut inner = self.lock();
                if inner.epoch == attempt {
                    self.set_state(ConnectionState::Error);
                    if from_timer && inner.auto_reconnect {
                        self.schedule_reconnect(&mut inner);
                    }
                }
                return Err(e);
            }
        };

        let mut inner = self.lock();
        if inner.epoch != attempt {
            tracing::debug!(%url, "connect superseded while dialing; closing new channel");
            let _ = channel.outbound.send(OutboundFrame::Close { code: CLOSE_NORMAL });
            return Ok(());
        }

        let DuplexChannel { outbound, inbound } = channel;
        let reader = tokio::spawn(read_loop(Arc::downgrade(&self.shared), attempt, inbound));
        let heartbeat = tokio::spawn(heartbeat_loop(outbound.clone(), self.shared.settings.heartbeat_interval));
        inner.session = Some(Session { id: attempt, outbound, reader, heartbeat });
        inner.reconnect_attempts = 0;
        inner.last_activity = Some(OffsetDateTime::now_utc());
        self.set_state(ConnectionState::Connected);
        tracing::info!(%url, "duplex channel connected");
        Ok(())
    }

    /// Close the channel and cancel every timer. Prevents automatic reconnect.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.auto_reconnect = false;
        if let Some(handle) = inner.reconnect.take() {
            handle.abort();
        }
        if let Some(session) = inner.session.take() {
            session.shutdown(Some(CLOSE_NORMAL));
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("duplex channel disconnected");
    }

    /// Send a text payload on the open channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when no channel is open.
    pub fn send_text(&self, payload: String) -> Result<(), ClientError> {
        let inner = self.lock();
        let session = inner
            .session
            .as_ref()
            .ok_or_else(|| ClientError::Channel("no open channel".to_owned()))?;
        session
            .outbound
            .send(OutboundFrame::Text(payload))
            .map_err(|_| ClientError::Channel("channel closed".to_owned()))
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn target(&self) -> Option<Target> {
        self.lock().target.clone()
    }

    #[must_use]
    pub fn last_activity(&self) -> Option<OffsetDateTime> {
        self.lock().last_activity
    }

    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.shared.router
    }

    /// Whether a reconnect timer is currently pending.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn handle_close(&self, session_id: u64, code: u16) {
        let mut inner = self.lock();
        let is_current = inner.session.as_ref().is_some_and(|s| s.id == session_id);
        if is_current {
            if let Some(session) = inner.session.take() {
                session.shutdown(None);
            }
            self.set_state(ConnectionState::Disconnected);
        } else if inner.session.is_some() {
            tracing::debug!(session_id, code, "ignoring close from superseded channel");
            return;
        }

        if is_normal_close(code) {
            tracing::info!(code, "duplex channel closed normally");
            return;
        }
        tracing::warn!(code, "duplex channel closed abnormally");
        if inner.auto_reconnect {
            self.schedule_reconnect(&mut inner);
        }
    }

    fn schedule_reconnect(&self, inner: &mut Inner) {
        if inner.reconnect.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("reconnect already pending");
            return;
        }
        let Some(target) = inner.target.clone() else {
            return;
        };
        if let Some(max) = self.shared.settings.max_reconnect_attempts {
            if inner.reconnect_attempts >= max {
                tracing::warn!(attempts = inner.reconnect_attempts, "reconnect limit reached");
                self.set_state(ConnectionState::Error);
                return;
            }
        }
        inner.reconnect_attempts += 1;

        let delay = self.shared.settings.reconnect_delay;
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = inner.reconnect_attempts,
            "scheduling reconnect"
        );
        let weak = Arc::downgrade(&self.shared);
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let manager = ConnectionManager { shared };
            if let Err(e) = manager.open(target, true).await {
                tracing::warn!(error = %e, "reconnect attempt failed");
            }
        }));
    }

    fn touch(&self) {
        self.lock().last_activity = Some(OffsetDateTime::now_utc());
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.state.send_replace(state);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn read_loop(shared: Weak<Shared>, session_id: u64, mut inbound: mpsc::UnboundedReceiver<ChannelEvent>) {
    let code = loop {
        match inbound.recv().await {
            Some(ChannelEvent::Text(text)) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let manager = ConnectionManager { shared };
                manager.touch();
                manager.router().dispatch(&text);
            }
            Some(ChannelEvent::Closed { code, reason }) => {
                tracing::debug!(code, %reason, "transport reported close");
                break code;
            }
            None => break CLOSE_ABNORMAL,
        }
    };
    if let Some(shared) = shared.upgrade() {
        ConnectionManager { shared }.handle_close(session_id, code);
    }
}

async fn heartbeat_loop(outbound: mpsc::UnboundedSender<OutboundFrame>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let now_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let timestamp = u64::try_from(now_ms).unwrap_or_default();
        if outbound.send(OutboundFrame::Text(ping_frame(timestamp))).is_err() {
            tracing::debug!("heartbeat stopped; channel closed");
            break;
        }
    }
}
