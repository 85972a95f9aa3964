mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{wait_for_status, Frame, TestServer, WAIT};
use livesync_client::notify::DisplayNotification;
use livesync_client::{
    CacheEvent, ConnectionPhase, HttpTokenProvider, NotificationSink, Permission, QueryCache,
    ReconnectConfig, SyncClient, SyncConfig, Visibility,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

#[derive(Default)]
struct CollectingSink {
    shown: Mutex<Vec<String>>,
}

impl NotificationSink for CollectingSink {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, notification: &DisplayNotification) {
        self.shown.lock().unwrap().push(notification.tag.clone());
    }
}

struct Harness {
    client: SyncClient,
    cache: Arc<QueryCache>,
    sink: Arc<CollectingSink>,
}

fn spawn_client(config: SyncConfig) -> Harness {
    let credentials = HttpTokenProvider::from_config(&config).unwrap();
    let cache = Arc::new(QueryCache::new());
    let sink = Arc::new(CollectingSink::default());
    let client = SyncClient::spawn(config, Arc::new(credentials), cache.clone(), sink.clone());
    Harness {
        client,
        cache,
        sink,
    }
}

async fn invalidated_until(events: &mut broadcast::Receiver<CacheEvent>, expected: &[&str]) -> HashSet<String> {
    let mut seen = HashSet::new();
    while !expected.iter().all(|key| seen.contains(*key)) {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let CacheEvent::Invalidated { key } = event {
            seen.insert(key.to_string());
        }
    }
    seen
}

#[tokio::test]
async fn connects_routes_updates_and_sends_commands() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();
    let mut events = h.cache.subscribe();

    h.client.connect();
    let mut conn = server.accept().await;
    assert_eq!(conn.token, "token-1");
    wait_for_status(&handle, |s| s.is_connected()).await;
    assert_eq!(
        server.state.cookies.lock().unwrap().as_slice(),
        &[Some("sid=test-session".to_string())]
    );

    conn.push(json!({
        "type": "data_update",
        "dataType": "posts",
        "action": "created",
        "data": { "postId": "p1" },
        "timestamp": "2026-01-01T00:00:00Z"
    }));
    let seen = invalidated_until(&mut events, &["posts", "comments/p1"]).await;
    assert!(seen.contains("posts"));
    assert!(seen.contains("comments/p1"));

    assert!(handle.mark_as_read("n1"));
    assert_eq!(
        conn.recv().await,
        Frame::Text(json!({ "type": "mark_as_read", "notificationId": "n1" }))
    );
    assert!(handle.request_snapshot());
    assert_eq!(conn.recv().await, Frame::Text(json!({ "type": "request_notifications" })));
}

#[tokio::test]
async fn garbage_frames_are_ignored_and_notifications_shown_once() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();
    let mut events = h.cache.subscribe();

    h.client.connect();
    let conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    conn.push(json!("not an object"));
    conn.push(json!({ "no_type": true }));
    conn.push(json!({ "type": "mystery" }));
    conn.push(json!({ "type": "data_update", "dataType": "spaceships", "action": "created" }));
    let notification = json!({
        "type": "new_notification",
        "data": { "notification": { "id": 7, "title": "Hello" } }
    });
    conn.push(notification.clone());
    conn.push(notification);
    conn.push(json!({ "type": "all_notifications_read" }));

    // new, duplicate, all-read
    let mut count = 0;
    while count < 3 {
        if let CacheEvent::Invalidated { key } = timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            assert_eq!(key.to_string(), "notifications");
            count += 1;
        }
    }
    assert_eq!(h.sink.shown.lock().unwrap().as_slice(), &["7".to_string()]);
    assert!(handle.is_connected());
}

#[tokio::test]
async fn repeated_connect_opens_one_socket() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    h.client.connect();
    let _conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;
    h.client.connect();
    h.client.set_visibility(Visibility::Visible);

    server.assert_no_connection(Duration::from_millis(300)).await;
    assert_eq!(server.token_fetches(), 1);
}

#[tokio::test]
async fn intentional_disconnect_closes_with_1000_and_stays_down() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    let mut conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    h.client.disconnect();
    assert_eq!(conn.recv().await, Frame::Close(Some(1000)));
    let status = wait_for_status(&handle, |s| s.phase == ConnectionPhase::Idle).await;
    assert!(status.last_error.is_none());

    server.assert_no_connection(Duration::from_millis(300)).await;
    assert_eq!(server.token_fetches(), 1);
    assert!(!handle.mark_as_read("n1"));
}

#[tokio::test]
async fn server_close_reconnects_with_a_fresh_token() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    let first = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    first.close(4000);
    let second = server.accept().await;
    assert_eq!(second.token, "token-2");
    wait_for_status(&handle, |s| s.is_connected()).await;
    assert_eq!(server.token_fetches(), 2);
}

#[tokio::test]
async fn foregrounding_reconnects_before_the_timer() {
    let mut server = TestServer::start().await;
    let mut config = server.config();
    config.reconnect = ReconnectConfig::fixed(Duration::from_secs(2));
    let h = spawn_client(config);
    let handle = h.client.handle();

    h.client.connect();
    let first = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    first.close(4000);
    wait_for_status(&handle, |s| s.phase == ConnectionPhase::Idle).await;
    let foregrounded = Instant::now();
    h.client.set_visibility(Visibility::Hidden);
    h.client.set_visibility(Visibility::Visible);

    let second = server.accept().await;
    assert!(foregrounded.elapsed() < Duration::from_secs(1));
    assert_eq!(second.token, "token-2");
    wait_for_status(&handle, |s| s.is_connected()).await;

    // The replaced reconnect timer would have fired by now.
    server.assert_no_connection(Duration::from_secs(3)).await;
    assert_eq!(server.token_fetches(), 2);
    assert!(handle.is_connected());
}

#[tokio::test]
async fn server_normal_close_does_not_reconnect() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    let conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    conn.close(1000);
    wait_for_status(&handle, |s| s.phase == ConnectionPhase::Idle).await;
    server.assert_no_connection(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn token_failure_is_reported_then_retried() {
    let mut server = TestServer::start().await;
    server.reject_tokens(true);
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    let status = wait_for_status(&handle, |s| {
        s.phase == ConnectionPhase::Idle && s.last_error.is_some()
    })
    .await;
    assert_eq!(status.last_error.as_deref(), Some("HTTP 401: session expired"));

    server.reject_tokens(false);
    let conn = server.accept().await;
    assert!(conn.token.starts_with("token-"));
    let status = wait_for_status(&handle, |s| s.is_connected()).await;
    assert!(status.last_error.is_none());
    assert!(server.token_fetches() >= 2);
}

#[tokio::test]
async fn heartbeat_without_replies_stays_open() {
    let mut server = TestServer::start().await;
    let mut config = server.config();
    config.heartbeat_interval = Duration::from_millis(100);
    let h = spawn_client(config);
    let handle = h.client.handle();

    h.client.connect();
    let mut conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    for _ in 0..3 {
        assert_eq!(conn.recv().await, Frame::Text(json!({ "type": "ping" })));
    }
    assert!(handle.is_connected());
    assert_eq!(server.token_fetches(), 1);
}

#[tokio::test]
async fn commands_are_refused_while_disconnected() {
    let server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    assert!(!handle.mark_as_read("n1"));
    assert!(!handle.mark_all_as_read());
    assert!(!handle.ping());
    assert_eq!(handle.status().phase, ConnectionPhase::Idle);
}

#[tokio::test]
async fn dropping_the_client_closes_the_socket() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    let mut conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    drop(h);
    assert_eq!(conn.recv().await, Frame::Close(Some(1000)));
    sleep(Duration::from_millis(200)).await;
    server.assert_no_connection(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn shutdown_waits_for_the_task() {
    let mut server = TestServer::start().await;
    let h = spawn_client(server.config());
    let handle = h.client.handle();

    h.client.connect();
    let mut conn = server.accept().await;
    wait_for_status(&handle, |s| s.is_connected()).await;

    h.client.shutdown().await;
    assert_eq!(conn.recv().await, Frame::Close(Some(1000)));
    assert!(!handle.is_connected());
}
