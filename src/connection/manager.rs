//! Resilient subscription to an organization topic
//!
//! One `ConnectionManager` owns at most one live subscription, identified by
//! the (organization, user) pair it was connected for. Drops are retried with
//! exponential backoff until the policy gives up, at which point the status
//! settles on `failed` until `connect()` is called again.
//!
//! Every outbound event is stamped with this instance's tab id, and inbound
//! events carrying the same tab id are discarded so an instance never reacts
//! to its own broadcast.
//!
//! Shared state lives behind a `parking_lot::Mutex` that is never held across
//! an `.await`. Status callbacks run after the lock is released. A generation
//! counter, bumped by `connect()` and `disconnect()`, invalidates attempts
//! that were superseded while they were in flight.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use crate::config::ConnectionConfig;
use crate::transport::{topic_key, TopicHandle, Transport, TransportFrame};
use crate::types::{BroadcastEvent, ConnectionStatus};

/// Type alias for the status callback
pub type OnStatusChange = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Type alias for the inbound event callback
pub type OnEvent = Arc<dyn Fn(BroadcastEvent) + Send + Sync>;

/// Callbacks invoked by the manager. Both are optional.
#[derive(Clone, Default)]
pub struct ConnectionCallbacks {
    on_status_change: Option<OnStatusChange>,
    on_event: Option<OnEvent>,
}

impl fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl ConnectionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per status transition
    pub fn on_status_change(mut self, f: impl Fn(ConnectionStatus) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    /// Called for every well-formed event that did not originate here
    pub fn on_event(mut self, f: impl Fn(BroadcastEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(f));
        self
    }
}

/// Result of [`ConnectionManager::broadcast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Handed to the transport
    Sent,
    /// Not connected; nothing was sent and nothing was queued
    NotConnected,
    /// The transport rejected the send; the subscription is treated as dropped
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    org_id: String,
    user_id: String,
}

#[derive(Default)]
struct State {
    status: ConnectionStatus,
    target: Option<Target>,
    handle: Option<TopicHandle>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Consecutive failed retries since the last successful subscription
    attempts: u32,
    generation: u64,
}

impl State {
    /// Cancel timers and the reader, hand back the subscription to close
    fn teardown(&mut self) -> Option<TopicHandle> {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.handle.take()
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    tab_id: String,
    policy: BackoffPolicy,
    callbacks: ConnectionCallbacks,
    state: Mutex<State>,
}

/// Lifecycle owner of one org-scoped subscription
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager with the default reconnect policy
    pub fn new(transport: Arc<dyn Transport>, callbacks: ConnectionCallbacks) -> Self {
        Self::with_config(transport, &ConnectionConfig::default(), callbacks)
    }

    /// Create a manager with a custom reconnect policy
    pub fn with_config(
        transport: Arc<dyn Transport>,
        config: &ConnectionConfig,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                tab_id: Uuid::new_v4().to_string(),
                policy: BackoffPolicy::from(config),
                callbacks,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Origin token stamped on every outbound event
    pub fn tab_id(&self) -> &str {
        &self.inner.tab_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Consecutive failed retries since the last successful subscription
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// Organization of the current (or last attempted) subscription
    pub fn org_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .target
            .as_ref()
            .map(|t| t.org_id.clone())
    }

    /// Subscribe to `org:<org_id>` on behalf of `user_id`.
    ///
    /// No-op while already connecting or connected for the same pair. Any
    /// other existing subscription is torn down first. Failures are not
    /// returned: they move the status to `reconnecting` (or `failed`).
    pub async fn connect(&self, org_id: &str, user_id: &str) {
        let target = Target {
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
        };

        let mut notices = Vec::new();
        let (generation, stale) = {
            let mut state = self.inner.state.lock();
            if state.target.as_ref() == Some(&target) && state.status.is_active() {
                debug!(org_id, user_id, status = %state.status, "connect ignored, already active");
                return;
            }

            let stale = state.teardown();
            if !matches!(state.status, ConnectionStatus::Disconnected | ConnectionStatus::Failed) {
                notices.extend(self.inner.transition(&mut state, ConnectionStatus::Disconnected));
            }
            notices.extend(self.inner.transition(&mut state, ConnectionStatus::Connecting));

            state.target = Some(target.clone());
            state.attempts = 0;
            state.generation += 1;
            (state.generation, stale)
        };
        self.inner.notify(notices);

        if let Some(handle) = stale {
            self.inner.transport.close(handle).await;
        }

        self.inner.open(generation, target, false).await;
    }

    /// Close the subscription and stop reconnecting until the next `connect()`
    pub async fn disconnect(&self) {
        let (stale, notices) = {
            let mut state = self.inner.state.lock();
            let stale = state.teardown();
            state.target = None;
            state.attempts = 0;
            state.generation += 1;
            let notices = self.inner.transition(&mut state, ConnectionStatus::Disconnected);
            (stale, notices)
        };
        self.inner.notify(notices);

        if let Some(handle) = stale {
            self.inner.transport.close(handle).await;
            info!("disconnected");
        }
    }

    /// Stamp `event` with this instance's tab id and send it now.
    ///
    /// Nothing is buffered: when not connected the event is handed back to the
    /// caller as `NotConnected` (see [`Outbox`](super::Outbox)).
    pub async fn broadcast(&self, event: BroadcastEvent) -> BroadcastOutcome {
        let (handle, generation) = {
            let state = self.inner.state.lock();
            match (state.status, state.handle) {
                (ConnectionStatus::Connected, Some(handle)) => (handle, state.generation),
                _ => return BroadcastOutcome::NotConnected,
            }
        };

        let event = event.with_tab_id(self.inner.tab_id.clone());
        let payload = match event.to_value() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "failed to encode event");
                return BroadcastOutcome::Failed;
            }
        };

        match self.inner.transport.send(handle, payload).await {
            Ok(()) => BroadcastOutcome::Sent,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "broadcast failed, treating subscription as dropped");
                self.inner.handle_drop(generation, handle, true).await;
                BroadcastOutcome::Failed
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Tasks hold an Arc<Inner>; stop them so the state can be freed.
        let stale = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.teardown()
        };

        let Some(handle) = stale else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(handle = handle.0, "connection manager dropped, closing subscription");
                let transport = Arc::clone(&self.inner.transport);
                runtime.spawn(async move { transport.close(handle).await });
            }
            Err(_) => {
                warn!(
                    handle = handle.0,
                    "connection manager dropped outside a runtime, subscription left open"
                );
            }
        }
    }
}

impl Inner {
    /// Apply a transition if the table allows it. Returns the status to report.
    fn transition(&self, state: &mut State, next: ConnectionStatus) -> Option<ConnectionStatus> {
        if state.status == next {
            return None;
        }
        if !state.status.can_transition_to(next) {
            warn!(from = %state.status, to = %next, "refusing illegal status transition");
            return None;
        }
        debug!(from = %state.status, to = %next, "status transition");
        state.status = next;
        Some(next)
    }

    fn notify(&self, notices: impl IntoIterator<Item = ConnectionStatus>) {
        if let Some(cb) = &self.callbacks.on_status_change {
            for status in notices {
                cb(status);
            }
        }
    }

    /// Open the topic for `target`. `retry` marks a backoff attempt.
    async fn open(self: &Arc<Self>, generation: u64, target: Target, retry: bool) {
        let topic = topic_key(&target.org_id);

        match self.transport.open_topic(&topic).await {
            Ok(subscription) => {
                let notice = {
                    let mut state = self.state.lock();
                    if state.generation != generation {
                        None
                    } else {
                        state.handle = Some(subscription.handle);
                        state.attempts = 0;
                        state.reader = Some(tokio::spawn(read_frames(
                            Arc::clone(self),
                            generation,
                            subscription.handle,
                            subscription.frames,
                        )));
                        Some(self.transition(&mut state, ConnectionStatus::Connected))
                    }
                };

                match notice {
                    Some(notices) => {
                        info!(topic = %topic, user_id = %target.user_id, retry, "subscribed");
                        self.notify(notices);
                    }
                    None => {
                        debug!(topic = %topic, "subscription superseded, closing");
                        self.transport.close(subscription.handle).await;
                    }
                }
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, retry, "subscribe failed");
                let notices = {
                    let mut state = self.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    if retry {
                        state.attempts += 1;
                    }
                    self.after_failure(&mut state, generation)
                };
                self.notify(notices);
            }
        }
    }

    /// Decide between another retry and giving up
    fn after_failure(self: &Arc<Self>, state: &mut State, generation: u64) -> Option<ConnectionStatus> {
        if self.policy.is_exhausted(state.attempts) {
            warn!(attempts = state.attempts, "reconnect attempts exhausted");
            return self.transition(state, ConnectionStatus::Failed);
        }
        let notice = self.transition(state, ConnectionStatus::Reconnecting);
        self.schedule_reconnect(state, generation);
        notice
    }

    /// Arm the single reconnect timer, replacing any pending one
    fn schedule_reconnect(self: &Arc<Self>, state: &mut State, generation: u64) {
        if let Some(previous) = state.reconnect.take() {
            previous.abort();
        }

        let delay = self.policy.delay(state.attempts);
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = state.attempts + 1,
            "scheduling reconnect"
        );

        let inner = Arc::clone(self);
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.retry(generation).await;
        }));
    }

    async fn retry(self: &Arc<Self>, generation: u64) {
        let target = {
            let mut state = self.state.lock();
            if state.generation != generation || state.status != ConnectionStatus::Reconnecting {
                return;
            }
            // This timer has fired; it is no longer pending
            state.reconnect = None;
            match state.target.clone() {
                Some(target) => target,
                None => return,
            }
        };
        self.open(generation, target, true).await;
    }

    /// The subscription behind `handle` is gone. Ignored if it was already
    /// replaced or torn down.
    async fn handle_drop(self: &Arc<Self>, generation: u64, handle: TopicHandle, stop_reader: bool) {
        let notices = {
            let mut state = self.state.lock();
            if state.generation != generation
                || state.handle != Some(handle)
                || state.status != ConnectionStatus::Connected
            {
                return;
            }

            state.handle = None;
            if let Some(reader) = state.reader.take() {
                if stop_reader {
                    reader.abort();
                }
            }
            state.attempts = 0;
            self.after_failure(&mut state, generation)
        };
        self.notify(notices);

        self.transport.close(handle).await;
    }

    /// Decode, self-filter and forward one inbound payload
    fn deliver(&self, payload: Value) {
        let event = match BroadcastEvent::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed event");
                return;
            }
        };

        if event.tab_id == self.tab_id {
            debug!(event_id = %event.event_id, "ignoring self-originated event");
            return;
        }

        if let Some(cb) = &self.callbacks.on_event {
            cb(event);
        }
    }
}

async fn read_frames(
    inner: Arc<Inner>,
    generation: u64,
    handle: TopicHandle,
    mut frames: mpsc::UnboundedReceiver<TransportFrame>,
) {
    let reason = loop {
        match frames.recv().await {
            Some(TransportFrame::Message(payload)) => inner.deliver(payload),
            Some(TransportFrame::Closed(reason)) => break reason,
            None => break "frame stream ended".to_string(),
        }
    };

    warn!(handle = handle.0, reason = %reason, "subscription dropped");
    inner.handle_drop(generation, handle, false).await;
}
