use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const ADDRESS: &str = "ws://backend.test/ws";
const GUEST: &str = "guest_user";

struct ServerEnd {
    sent: mpsc::UnboundedReceiver<OutboundFrame>,
    push: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct MockDialer {
    dials: AtomicUsize,
    fail: AtomicBool,
    urls: Mutex<Vec<String>>,
    ends: Mutex<Vec<ServerEnd>>,
}

impl MockDialer {
    fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    fn push(&self, index: usize, event: ChannelEvent) {
        let ends = self.ends.lock().unwrap();
        ends[index].push.send(event).expect("client side should be listening");
    }

    /// Drain everything the client sent on channel `index`.
    fn drain(&self, index: usize) -> Vec<OutboundFrame> {
        let mut ends = self.ends.lock().unwrap();
        let mut frames = Vec::new();
        while let Ok(frame) = ends[index].sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[async_trait::async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, url: &str) -> Result<DuplexChannel, ClientError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_owned());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Channel("connection refused".into()));
        }
        let (outbound, sent) = mpsc::unbounded_channel();
        let (push, inbound) = mpsc::unbounded_channel();
        self.ends.lock().unwrap().push(ServerEnd { sent, push });
        Ok(DuplexChannel { outbound, inbound })
    }
}

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        heartbeat_interval: Duration::from_secs(30),
        reconnect_delay: Duration::from_secs(3),
        max_reconnect_attempts: None,
    }
}

fn manager_with(settings: ConnectionSettings) -> (ConnectionManager, Arc<MockDialer>) {
    let dialer = Arc::new(MockDialer::default());
    let manager = ConnectionManager::new(dialer.clone(), Arc::new(MessageRouter::new()), settings);
    (manager, dialer)
}

fn pings(frames: &[OutboundFrame]) -> usize {
    frames
        .iter()
        .filter(|f| matches!(f, OutboundFrame::Text(t) if t.contains("\"ping\"")))
        .count()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn current_session_id(manager: &ConnectionManager) -> u64 {
    manager.lock().session.as_ref().map(|s| s.id).expect("open session")
}

#[tokio::test(start_paused = true)]
async fn connect_appends_correlation_id_to_address() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(dialer.urls.lock().unwrap().as_slice(), ["ws://backend.test/ws/guest_user"]);
    assert_eq!(manager.target().unwrap().correlation_id, GUEST);
    assert!(manager.last_activity().is_some());
}

#[tokio::test(start_paused = true)]
async fn connect_twice_opens_one_channel_and_one_heartbeat() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();
    manager.connect(ADDRESS, GUEST).await.unwrap();
    assert_eq!(dialer.dial_count(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(pings(&dialer.drain(0)), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(pings(&dialer.drain(0)), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_sends_ping_payload() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    let frames = dialer.drain(0);
    let OutboundFrame::Text(text) = &frames[0] else {
        panic!("expected text ping");
    };
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(value["type"], "ping");
    assert!(value["timestamp"].is_u64());
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_reach_router() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.push(
        0,
        ChannelEvent::Text(r#"{"type":"generation_progress","data":{"progress":30,"message":"Assessing privacy requirements..."}}"#.into()),
    );
    settle().await;

    let latest = manager.router().latest_progress().expect("routed progress");
    assert_eq!(latest.progress, Some(30));
}

#[tokio::test(start_paused = true)]
async fn normal_close_stops_heartbeat_without_reconnect() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.push(0, ChannelEvent::Closed { code: CLOSE_NORMAL, reason: String::new() });
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(pings(&dialer.drain(0)), 0);
    assert_eq!(dialer.dial_count(), 1);
    assert!(!manager.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn going_away_close_does_not_reconnect() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.push(0, ChannelEvent::Closed { code: CLOSE_GOING_AWAY, reason: "server shutdown".into() });
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_fixed_delay() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.push(0, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(dialer.dial_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn two_abnormal_closures_schedule_one_reconnect() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();
    let session = current_session_id(&manager);

    manager.handle_close(session, CLOSE_ABNORMAL);
    manager.handle_close(session, CLOSE_ABNORMAL);
    assert!(manager.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn dropped_transport_counts_as_abnormal_close() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.ends.lock().unwrap().clear();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(dialer.dial_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_leaves_no_timers() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();
    manager.disconnect();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_secs(120)).await;

    let frames = dialer.drain(0);
    assert_eq!(frames, vec![OutboundFrame::Close { code: CLOSE_NORMAL }]);
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.push(0, ChannelEvent::Closed { code: 4000, reason: String::new() });
    settle().await;
    assert!(manager.reconnect_pending());

    manager.disconnect();
    assert!(!manager.reconnect_pending());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn failed_dial_sets_error_without_scheduling_reconnect() {
    let (manager, dialer) = manager_with(settings());
    dialer.fail.store(true, Ordering::SeqCst);

    let err = manager.connect(ADDRESS, GUEST).await.unwrap_err();
    assert!(matches!(err, ClientError::Channel(_)));
    assert_eq!(manager.state(), ConnectionState::Error);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(dialer.dial_count(), 1);
    assert!(!manager.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn connect_after_error_retries() {
    let (manager, dialer) = manager_with(settings());
    dialer.fail.store(true, Ordering::SeqCst);
    assert!(manager.connect(ADDRESS, GUEST).await.is_err());

    dialer.fail.store(false, Ordering::SeqCst);
    manager.connect(ADDRESS, GUEST).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(dialer.dial_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_ceiling_stops_after_limit() {
    let (manager, dialer) = manager_with(ConnectionSettings { max_reconnect_attempts: Some(1), ..settings() });
    manager.connect(ADDRESS, GUEST).await.unwrap();

    // First abnormal close uses the single allowed attempt, which then fails.
    dialer.fail.store(true, Ordering::SeqCst);
    dialer.push(0, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Error);

    // A stray close with nothing open and the budget spent schedules nothing.
    manager.handle_close(u64::MAX, CLOSE_ABNORMAL);
    assert!(!manager.reconnect_pending());
    assert_eq!(manager.state(), ConnectionState::Error);
}

#[tokio::test(start_paused = true)]
async fn reconnect_keeps_trying_after_failed_dials() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.fail.store(true, Ordering::SeqCst);
    dialer.push(0, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(dialer.dial_count(), 2);
    assert!(manager.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(dialer.dial_count(), 3);
    assert!(manager.reconnect_pending());

    // Backend comes back; the next scheduled attempt succeeds.
    dialer.fail.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(dialer.dial_count(), 4);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(!manager.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn reconnect_ceiling_counts_each_failed_attempt() {
    let (manager, dialer) = manager_with(ConnectionSettings { max_reconnect_attempts: Some(3), ..settings() });
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.fail.store(true, Ordering::SeqCst);
    dialer.push(0, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    tokio::time::sleep(Duration::from_secs(60)).await;

    // One initial dial plus exactly three reconnect attempts.
    assert_eq!(dialer.dial_count(), 4);
    assert_eq!(manager.state(), ConnectionState::Error);
    assert!(!manager.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_restores_attempt_budget() {
    let (manager, dialer) = manager_with(ConnectionSettings { max_reconnect_attempts: Some(1), ..settings() });
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.push(0, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    dialer.push(1, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(dialer.dial_count(), 3);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_retrying_after_failed_dial() {
    let (manager, dialer) = manager_with(settings());
    manager.connect(ADDRESS, GUEST).await.unwrap();

    dialer.fail.store(true, Ordering::SeqCst);
    dialer.push(0, ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(manager.reconnect_pending());

    manager.disconnect();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dial_count(), 2);
    assert!(!manager.reconnect_pending());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn send_text_requires_open_channel() {
    let (manager, dialer) = manager_with(settings());
    assert!(matches!(manager.send_text("hi".into()), Err(ClientError::Channel(_))));

    manager.connect(ADDRESS, GUEST).await.unwrap();
    manager.send_text("hi".into()).unwrap();
    assert_eq!(dialer.drain(0), vec![OutboundFrame::Text("hi".into())]);
}

#[test]
fn normal_close_codes() {
    assert!(is_normal_close(CLOSE_NORMAL));
    assert!(is_normal_close(CLOSE_GOING_AWAY));
    assert!(!is_normal_close(CLOSE_NO_STATUS));
    assert!(!is_normal_close(CLOSE_ABNORMAL));
}
