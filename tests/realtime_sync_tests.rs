//! End-to-end tests: emitter → in-memory bus → connection manager → processor → consumer
//!
//! Time is paused in every test; sleeping advances the clock once all tasks are idle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use taskboard_realtime::{
    BroadcastOutcome, ConnectionStatus, EventDraft, EventEmitter, EventType, InMemoryTransport,
    InvalidationKey, ProcessedBatch, RealtimeSync, SyncConfig,
};

struct Client {
    sync: RealtimeSync,
    statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
    batches: Arc<Mutex<Vec<ProcessedBatch>>>,
}

impl Client {
    fn new(transport: &Arc<InMemoryTransport>) -> Self {
        init_tracing();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let batches = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&statuses);
        let b = Arc::clone(&batches);
        let sync = RealtimeSync::new(
            transport.clone(),
            &SyncConfig::default(),
            move |status| s.lock().push(status),
            move |batch| b.lock().push(batch),
        )
        .expect("default config is valid");

        Self {
            sync,
            statuses,
            batches,
        }
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    fn event_count(&self) -> usize {
        self.batches.lock().iter().map(|b| b.events.len()).sum()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn assert_legal(statuses: &[ConnectionStatus]) {
    let mut current = ConnectionStatus::Disconnected;
    for next in statuses {
        assert!(current.can_transition_to(*next), "{} -> {}", current, next);
        current = *next;
    }
}

#[tokio::test(start_paused = true)]
async fn test_peer_broadcast_reaches_other_tab_only() {
    let transport = Arc::new(InMemoryTransport::new());
    let a = Client::new(&transport);
    let b = Client::new(&transport);
    a.sync.connect("acme", "ana").await;
    b.sync.connect("acme", "ben").await;

    let event = EventDraft::task_status_changed("acme", "p1", "t1", Some("f1"), "todo")
        .into_event("ignored");
    assert_eq!(a.sync.broadcast(event).await, BroadcastOutcome::Sent);
    wait(1000).await;

    assert_eq!(a.batch_count(), 0);
    assert_eq!(b.batch_count(), 1);

    let batches = b.batches.lock();
    let keys: Vec<String> = batches[0]
        .invalidation_keys
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(keys.contains(&"task-detail:t1".to_string()));
    assert!(keys.contains(&"task-list:p1".to_string()));
    assert!(keys.contains(&"feature-detail:f1".to_string()));
    assert!(keys.contains(&"dashboard-myTasks".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_emitter_burst_coalesces_into_one_batch() {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Client::new(&transport);
    client.sync.connect("acme", "ana").await;
    let emitter = EventEmitter::new(transport.clone());

    for i in 0..10 {
        emitter
            .emit(EventDraft::task("acme", "p1", &format!("t{}", i), EventType::Created, Some("f1")))
            .await
            .unwrap();
        wait(20).await;
    }
    wait(1000).await;

    let batches = client.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].events.len(), 10);
    let ids: Vec<&str> = batches[0].events.iter().map(|e| e.entity_id.as_str()).collect();
    assert_eq!(ids[0], "t0");
    assert_eq!(ids[9], "t9");
    assert_eq!(
        batches[0].invalidation_keys.iter().cloned().collect::<Vec<_>>(),
        vec![
            InvalidationKey::TaskList { project_id: "p1".to_string() },
            InvalidationKey::FeatureDetail { feature_id: "f1".to_string() },
            InvalidationKey::Dashboard,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_event_is_processed_once() {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Client::new(&transport);
    client.sync.connect("acme", "ana").await;

    let event = EventDraft::epic("acme", "p1", "e1", EventType::Updated).into_event("server");
    let payload = event.to_value().unwrap();
    transport.publish("org:acme", payload.clone());
    transport.publish("org:acme", payload);
    wait(1000).await;

    assert_eq!(client.event_count(), 1);
    assert_eq!(client.sync.stats().duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_echo_of_own_request_is_skipped() {
    let transport = Arc::new(InMemoryTransport::new());
    let a = Client::new(&transport);
    let b = Client::new(&transport);
    a.sync.connect("acme", "ana").await;
    b.sync.connect("acme", "ben").await;
    let emitter = EventEmitter::new(transport.clone());

    emitter
        .emit(
            EventDraft::comment("acme", "p1", "c1", EventType::Created, "t1")
                .from_tab(a.sync.tab_id()),
        )
        .await
        .unwrap();
    wait(1000).await;

    assert_eq!(a.event_count(), 0);
    assert_eq!(b.event_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_gap_is_flagged_but_processed() {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Client::new(&transport);
    client.sync.connect("acme", "ana").await;

    for sequence in [10, 12] {
        let mut event =
            EventDraft::task("acme", "p1", "1", EventType::Updated, None).into_event("server");
        event.sequence = sequence;
        transport.publish("org:acme", event.to_value().unwrap());
    }
    wait(1000).await;

    let batches = client.batches.lock();
    assert_eq!(batches[0].events.len(), 2);
    assert_eq!(batches[0].gaps.len(), 1);
    assert_eq!(batches[0].gaps[0].entity_key, "task:1");
}

#[tokio::test(start_paused = true)]
async fn test_organizations_are_isolated() {
    let transport = Arc::new(InMemoryTransport::new());
    let acme = Client::new(&transport);
    let globex = Client::new(&transport);
    acme.sync.connect("acme", "ana").await;
    globex.sync.connect("globex", "gus").await;
    let emitter = EventEmitter::new(transport.clone());

    emitter
        .emit(EventDraft::epic("acme", "p1", "e1", EventType::Created))
        .await
        .unwrap();
    wait(1000).await;

    assert_eq!(acme.event_count(), 1);
    assert_eq!(globex.event_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_events_flow_again_after_reconnect() {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Client::new(&transport);
    client.sync.connect("acme", "ana").await;
    let emitter = EventEmitter::new(transport.clone());

    transport.drop_all("bus restarted");
    wait(10).await;
    assert_eq!(client.sync.status(), ConnectionStatus::Reconnecting);

    wait(5000).await;
    assert_eq!(client.sync.status(), ConnectionStatus::Connected);

    emitter
        .emit(EventDraft::epic("acme", "p1", "e1", EventType::Updated))
        .await
        .unwrap();
    wait(1000).await;

    assert_eq!(client.event_count(), 1);
    let statuses = client.statuses.lock();
    assert_legal(&statuses);
    assert_eq!(statuses.last(), Some(&ConnectionStatus::Connected));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_and_disconnects() {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Client::new(&transport);
    client.sync.connect("acme", "ana").await;

    let event = EventDraft::epic("acme", "p1", "e1", EventType::Deleted).into_event("server");
    transport.publish("org:acme", event.to_value().unwrap());
    wait(10).await;
    assert_eq!(client.batch_count(), 0);

    client.sync.shutdown().await;

    assert_eq!(client.batch_count(), 1);
    assert_eq!(client.sync.status(), ConnectionStatus::Disconnected);
    assert_eq!(transport.subscriber_count("org:acme"), 0);
    assert_eq!(
        *client.statuses.lock(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_sync_without_shutdown_releases_topic() {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Client::new(&transport);
    client.sync.connect("acme", "ana").await;
    assert_eq!(transport.subscriber_count("org:acme"), 1);

    drop(client);
    wait(5000).await;

    assert_eq!(transport.subscriber_count("org:acme"), 0);
}
