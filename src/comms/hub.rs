/// Server side of the comms channel
///
/// Every authenticated connection receives every publication; a subscribe
/// request only triggers replay of the retained messages matching its
/// pattern. Publications are queued per connection and flushed as batch
/// frames after a short window.

use crate::{
    comms::{
        topic::TopicMatcher,
        types::{AuthStatus, ClientFrame, ServerFrame, TopicMessage, HEARTBEAT_TOPIC},
    },
    events::{self, handler, EventBus},
};
use arc_swap::ArcSwap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Hub batching, keep-alive and authentication settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub batch_window: Duration,
    pub batch_size: usize,
    pub keepalive: Duration,
    /// When set, connections must authenticate with this token
    pub auth_token: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(50),
            batch_size: 50,
            keepalive: Duration::from_secs(15),
            auth_token: None,
        }
    }
}

/// A newly accepted connection: its id and the frames to write to it
#[derive(Debug)]
pub struct HubSession {
    pub id: u64,
    pub frames: UnboundedReceiver<String>,
}

/// What the transport should do after handing an inbound frame to the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// Flush pending frames, then close the connection
    Close,
}

struct HubConnection {
    /// Direct frames (auth replies) and flushed batches
    frames: UnboundedSender<String>,
    /// Topic messages awaiting the next batch
    queue: UnboundedSender<TopicMessage>,
    authenticated: AtomicBool,
}

impl HubConnection {
    fn send(&self, message: TopicMessage) {
        // a closed queue means the connection is going away
        let _ = self.queue.send(message);
    }
}

pub struct CommsHub {
    config: HubConfig,
    connections: ArcSwap<HashMap<u64, Arc<HubConnection>>>,
    retained: ArcSwap<BTreeMap<String, Value>>,
    next_id: AtomicU64,
    /// Unix millis of the last flushed frame on any connection
    last_sent: Arc<AtomicI64>,
}

impl fmt::Debug for CommsHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommsHub")
            .field("connections", &self.connections.load().len())
            .field("retained", &self.retained.load().len())
            .finish()
    }
}

#[derive(Deserialize)]
struct StatusEvent {
    id: String,
    #[serde(default)]
    status: Map<String, Value>,
}

#[derive(Deserialize)]
struct IdPayloadEvent {
    id: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    retain: bool,
}

#[derive(Deserialize)]
struct CommsEvent {
    topic: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    retain: bool,
}

impl CommsHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: ArcSwap::new(Arc::new(HashMap::new())),
            retained: ArcSwap::new(Arc::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            last_sent: Arc::new(AtomicI64::new(now_millis())),
        }
    }

    /// Republish runtime bus events to comms observers
    ///
    /// - `node-status` -> `status/<id>` (retained; text, fill and shape only)
    /// - `runtime-event` -> `notification/<id>`
    /// - `comms` -> its own topic
    /// - `event-log` -> `event-log/<id>`
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let hub = Arc::clone(self);
        bus.on(
            events::NODE_STATUS,
            handler(move |value| {
                let event: StatusEvent = serde_json::from_value(value.clone())?;
                let status: Map<String, Value> = event
                    .status
                    .into_iter()
                    .filter(|(k, _)| matches!(k.as_str(), "text" | "fill" | "shape"))
                    .collect();
                hub.publish(&format!("status/{}", event.id), Value::Object(status), true);
                Ok(())
            }),
        );

        let hub = Arc::clone(self);
        bus.on(
            events::RUNTIME_EVENT,
            handler(move |value| {
                let event: IdPayloadEvent = serde_json::from_value(value.clone())?;
                let payload = event.payload.unwrap_or_else(|| Value::Object(Map::new()));
                hub.publish(&format!("notification/{}", event.id), payload, event.retain);
                Ok(())
            }),
        );

        let hub = Arc::clone(self);
        bus.on(
            events::COMMS,
            handler(move |value| {
                let event: CommsEvent = serde_json::from_value(value.clone())?;
                hub.publish(&event.topic, event.data, event.retain);
                Ok(())
            }),
        );

        let hub = Arc::clone(self);
        bus.on(
            events::EVENT_LOG,
            handler(move |value| {
                let event: IdPayloadEvent = serde_json::from_value(value.clone())?;
                let payload = event.payload.unwrap_or_else(|| Value::Object(Map::new()));
                hub.publish(&format!("event-log/{}", event.id), payload, false);
                Ok(())
            }),
        );
    }

    /// Publish to every connection; `retain` keeps the message for later
    /// subscribers, anything else clears a retained message on that topic
    pub fn publish(&self, topic: &str, data: Value, retain: bool) {
        self.retained.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            if retain {
                next.insert(topic.to_string(), data.clone());
            } else {
                next.remove(topic);
            }
            next
        });
        self.broadcast(TopicMessage::new(topic, data));
    }

    pub fn retained(&self, topic: &str) -> Option<Value> {
        self.retained.load().get(topic).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load().len()
    }

    /// Register a connection and start its batching task
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> HubSession {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (frames_tx, frames_rx) = unbounded_channel();
        let (queue_tx, queue_rx) = unbounded_channel();

        let connection = Arc::new(HubConnection {
            frames: frames_tx.clone(),
            queue: queue_tx,
            authenticated: AtomicBool::new(self.config.auth_token.is_none()),
        });
        self.connections.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(id, Arc::clone(&connection));
            next
        });

        tokio::spawn(batch_frames(
            queue_rx,
            frames_tx,
            self.config.batch_window,
            self.config.batch_size.max(1),
            Arc::clone(&self.last_sent),
        ));
        tracing::debug!(connection = id, "comms connection opened");

        HubSession {
            id,
            frames: frames_rx,
        }
    }

    pub fn disconnect(&self, id: u64) {
        self.connections.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(&id);
            next
        });
        tracing::debug!(connection = id, "comms connection closed");
    }

    /// Handle one text frame received from connection `id`
    pub fn handle_frame(&self, id: u64, text: &str) -> FrameOutcome {
        let Some(connection) = self.connections.load().get(&id).cloned() else {
            return FrameOutcome::Close;
        };
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!(connection = id, "ignoring comms frame: {}", e);
                if connection.authenticated.load(Ordering::SeqCst) {
                    return FrameOutcome::Continue;
                }
                return self.reject(&connection);
            }
        };

        match frame {
            ClientFrame::Auth(token) => {
                if self.config.auth_token.as_deref() == Some(token.as_str()) {
                    connection.authenticated.store(true, Ordering::SeqCst);
                    send_direct(&connection, &ServerFrame::Auth { auth: AuthStatus::Ok });
                    FrameOutcome::Continue
                } else {
                    self.reject(&connection)
                }
            }
            ClientFrame::Subscribe(pattern) => {
                if !connection.authenticated.load(Ordering::SeqCst) {
                    return self.reject(&connection);
                }
                self.replay_retained(&connection, &pattern);
                FrameOutcome::Continue
            }
        }
    }

    /// Send `hb` to every connection if nothing was flushed for a keep-alive period
    pub fn heartbeat(&self) {
        let last = self.last_sent.load(Ordering::SeqCst);
        let idle = now_millis().saturating_sub(last);
        if idle > self.config.keepalive.as_millis() as i64 {
            self.broadcast(TopicMessage::new(HEARTBEAT_TOPIC, Value::from(last)));
        }
    }

    /// Run `heartbeat` every keep-alive period
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let period = hub.config.keepalive.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                hub.heartbeat();
            }
        })
    }

    fn broadcast(&self, message: TopicMessage) {
        for connection in self.connections.load().values() {
            if connection.authenticated.load(Ordering::SeqCst) {
                connection.send(message.clone());
            }
        }
    }

    fn replay_retained(&self, connection: &HubConnection, pattern: &str) {
        let matcher = match TopicMatcher::new(pattern) {
            Ok(matcher) => matcher,
            Err(e) => {
                tracing::warn!("rejecting comms subscription: {}", e);
                return;
            }
        };
        for (topic, data) in self.retained.load().iter() {
            if matcher.matches(topic) {
                connection.send(TopicMessage::new(topic.clone(), data.clone()));
            }
        }
    }

    fn reject(&self, connection: &HubConnection) -> FrameOutcome {
        connection.authenticated.store(false, Ordering::SeqCst);
        send_direct(connection, &ServerFrame::Auth { auth: AuthStatus::Fail });
        FrameOutcome::Close
    }
}

fn send_direct(connection: &HubConnection, frame: &ServerFrame) {
    match frame.to_text() {
        Ok(text) => {
            let _ = connection.frames.send(text);
        }
        Err(e) => tracing::warn!("failed to encode comms frame: {}", e),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Collect queued messages into batch frames of at most `size`
async fn batch_frames(
    mut queue: UnboundedReceiver<TopicMessage>,
    frames: UnboundedSender<String>,
    window: Duration,
    size: usize,
    last_sent: Arc<AtomicI64>,
) {
    while let Some(first) = queue.recv().await {
        tokio::time::sleep(window).await;
        let mut batch = vec![first];
        while batch.len() < size {
            match queue.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        match ServerFrame::Batch(batch).to_text() {
            Ok(text) => {
                last_sent.store(now_millis(), Ordering::SeqCst);
                if frames.send(text).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("failed to encode comms batch: {}", e),
        }
    }
}
