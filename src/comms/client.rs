/// Realtime comms client
///
/// One driver task owns the connection lifecycle:
/// `Disconnected -> Connecting -> Connected -> Disconnected (retry)`.
/// Because the driver is the only place a reconnect is scheduled, failures
/// can never stack timers. Subscriptions live in a table independent of the
/// connection and are replayed to the peer every time it connects.

use crate::comms::{
    topic::TopicMatcher,
    transport::{Connection, Connector},
    types::{AuthStatus, ClientFrame, CommsError, ServerFrame, TopicMessage},
};
use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc::UnboundedSender, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Subscriber callback, invoked with the concrete topic and its data
pub type Callback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Wrap a closure as a subscriber callback
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&str, &Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// User-visible connection notices
///
/// The client guarantees at most one outstanding `connection_lost` until the
/// next `connection_restored`.
pub trait Notifier: Send + Sync {
    fn connection_lost(&self);
    fn connection_restored(&self);
    fn auth_failed(&self) {}
}

/// Notifier that reports through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn connection_lost(&self) {
        tracing::warn!("⚠️ Lost connection to comms peer, reconnecting");
    }

    fn connection_restored(&self) {
        tracing::info!("🔌 Comms connection restored");
    }

    fn auth_failed(&self) {
        tracing::error!("❌ Comms authentication rejected, not reconnecting");
    }
}

/// Client retry and authentication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Delay while `attempts < short_attempts`
    pub short_retry_ms: u64,
    /// Delay while `attempts < medium_attempts`
    pub medium_retry_ms: u64,
    /// Delay after that
    pub long_retry_ms: u64,
    pub short_attempts: u32,
    pub medium_attempts: u32,
    /// Failed attempts tolerated before `connection_lost` is raised
    pub notify_after: u32,
    /// Sent as `{"auth": token}` before subscriptions are replayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            short_retry_ms: 1_000,
            medium_retry_ms: 2_000,
            long_retry_ms: 60_000,
            short_attempts: 10,
            medium_attempts: 20,
            notify_after: 0,
            auth_token: None,
        }
    }
}

impl ClientConfig {
    /// Delay before reconnect attempt number `attempts` (1-based)
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let ms = if attempts < self.short_attempts {
            self.short_retry_ms
        } else if attempts < self.medium_attempts {
            self.medium_retry_ms
        } else {
            self.long_retry_ms
        };
        Duration::from_millis(ms)
    }
}

struct Subscription {
    matcher: TopicMatcher,
    callbacks: Vec<Callback>,
}

enum Outcome {
    Dropped,
    Stopped,
    AuthFailed,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    /// In first-subscribed order; replayed in this order
    subscriptions: ArcSwap<Vec<Arc<Subscription>>>,
    /// Present only while connected (and authenticated)
    outbound: ArcSwapOption<UnboundedSender<String>>,
    state: watch::Sender<ConnectionState>,
    /// Stop signal of the active driver; empty when none is running
    stop: ArcSwapOption<watch::Sender<bool>>,
    attempts: AtomicU32,
    /// A `connection_lost` notice is outstanding
    notified: AtomicBool,
}

/// Realtime comms client
#[derive(Clone)]
pub struct CommsClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for CommsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommsClient")
            .field("state", &self.state())
            .field("patterns", &self.patterns())
            .finish()
    }
}

impl CommsClient {
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        Self::with_notifier(connector, config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                notifier,
                subscriptions: ArcSwap::new(Arc::new(Vec::new())),
                outbound: ArcSwapOption::empty(),
                state,
                stop: ArcSwapOption::empty(),
                attempts: AtomicU32::new(0),
                notified: AtomicBool::new(false),
            }),
        }
    }

    /// Start connecting; no-op while the driver is already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let (stop, stopped) = watch::channel(false);
        let stop = Arc::new(stop);
        let mut started = false;
        self.inner.stop.rcu(|current| match current {
            Some(active) => {
                started = false;
                Some(Arc::clone(active))
            }
            None => {
                started = true;
                Some(Arc::clone(&stop))
            }
        });
        if started {
            tokio::spawn(drive(Arc::clone(&self.inner), stop, stopped));
        }
    }

    /// Close the connection and stop reconnecting
    ///
    /// A later `connect` starts a fresh driver even if the stopped one has
    /// not exited yet.
    pub fn disconnect(&self) {
        if let Some(stop) = self.inner.stop.swap(None) {
            stop.send_replace(true);
        }
        self.inner.outbound.store(None);
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Registered patterns in replay order
    pub fn patterns(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .load()
            .iter()
            .map(|s| s.matcher.pattern().to_string())
            .collect()
    }

    /// Register `callback` under `pattern`
    ///
    /// A new pattern is sent to the peer straight away when connected; either
    /// way it is replayed on every (re)connect.
    pub fn subscribe(&self, pattern: &str, callback: Callback) -> Result<(), CommsError> {
        let matcher = TopicMatcher::new(pattern)?;
        let mut is_new = false;
        self.inner.subscriptions.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter().position(|s| s.matcher.pattern() == pattern) {
                Some(i) => {
                    is_new = false;
                    let mut callbacks = next[i].callbacks.clone();
                    callbacks.push(Arc::clone(&callback));
                    next[i] = Arc::new(Subscription {
                        matcher: next[i].matcher.clone(),
                        callbacks,
                    });
                }
                None => {
                    is_new = true;
                    next.push(Arc::new(Subscription {
                        matcher: matcher.clone(),
                        callbacks: vec![Arc::clone(&callback)],
                    }));
                }
            }
            next
        });

        if is_new {
            if let Some(outbound) = self.inner.outbound.load_full() {
                self.inner
                    .send_frame(&outbound, &ClientFrame::Subscribe(pattern.to_string()));
            }
        }
        Ok(())
    }

    /// Remove the first registration of `callback` under `pattern`
    ///
    /// The pattern itself is dropped once no callbacks remain. Returns
    /// whether a callback was removed.
    pub fn unsubscribe(&self, pattern: &str, callback: &Callback) -> bool {
        let mut removed = false;
        self.inner.subscriptions.rcu(|current| {
            removed = false;
            let mut next = Vec::clone(current);
            if let Some(i) = next.iter().position(|s| s.matcher.pattern() == pattern) {
                let mut callbacks = next[i].callbacks.clone();
                if let Some(j) = callbacks.iter().position(|c| Arc::ptr_eq(c, callback)) {
                    callbacks.remove(j);
                    removed = true;
                }
                if callbacks.is_empty() {
                    next.remove(i);
                } else {
                    next[i] = Arc::new(Subscription {
                        matcher: next[i].matcher.clone(),
                        callbacks,
                    });
                }
            }
            next
        });
        removed
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn send_frame(&self, outbound: &UnboundedSender<String>, frame: &ClientFrame) {
        match frame.to_text() {
            Ok(text) => {
                if outbound.send(text).is_err() {
                    tracing::debug!("comms connection closed before frame was sent");
                }
            }
            Err(e) => tracing::warn!("failed to encode comms frame: {}", e),
        }
    }

    /// Publish the sender, then replay every held pattern
    fn complete(&self, outbound: &UnboundedSender<String>) {
        self.outbound.store(Some(Arc::new(outbound.clone())));
        self.set_state(ConnectionState::Connected);
        for subscription in self.subscriptions.load().iter() {
            self.send_frame(
                outbound,
                &ClientFrame::Subscribe(subscription.matcher.pattern().to_string()),
            );
        }
        tracing::debug!("comms connected");
    }

    /// Deliver `message` to every callback whose pattern matches its topic
    fn dispatch(&self, message: &TopicMessage) {
        let subscriptions = self.subscriptions.load_full();
        for subscription in subscriptions.iter() {
            if !subscription.matcher.matches(&message.topic) {
                continue;
            }
            for callback in &subscription.callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(&message.topic, &message.data))).is_err() {
                    tracing::error!(topic = %message.topic, "comms subscriber panicked");
                }
            }
        }
    }

    async fn run(&self, connection: Connection, stop: &mut watch::Receiver<bool>) -> Outcome {
        let Connection {
            outbound,
            mut inbound,
        } = connection;

        if *stop.borrow() {
            return Outcome::Stopped;
        }
        self.attempts.store(0, Ordering::SeqCst);
        if self.notified.swap(false, Ordering::SeqCst) {
            self.notifier.connection_restored();
        }

        let mut pending_auth = match &self.config.auth_token {
            Some(token) => {
                self.send_frame(&outbound, &ClientFrame::Auth(token.clone()));
                true
            }
            None => {
                self.complete(&outbound);
                false
            }
        };

        loop {
            let frame = tokio::select! {
                frame = inbound.recv() => frame,
                _ = stop.wait_for(|stopped| *stopped) => return Outcome::Stopped,
            };
            let Some(text) = frame else {
                return Outcome::Dropped;
            };

            match ServerFrame::parse(&text) {
                Ok(ServerFrame::Auth { auth: AuthStatus::Ok }) => {
                    if pending_auth {
                        pending_auth = false;
                        self.complete(&outbound);
                    }
                }
                Ok(ServerFrame::Auth { auth: AuthStatus::Fail }) => return Outcome::AuthFailed,
                Ok(frame) => {
                    for message in frame.into_messages() {
                        self.dispatch(&message);
                    }
                }
                Err(e) => tracing::debug!("ignoring comms frame: {}", e),
            }
        }
    }
}

async fn drive(
    inner: Arc<Inner>,
    own_stop: Arc<watch::Sender<bool>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }
        inner.set_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            result = inner.connector.connect() => result,
            _ = stop.wait_for(|stopped| *stopped) => return,
        };

        let outcome = match connected {
            Ok(connection) => inner.run(connection, &mut stop).await,
            Err(e) => {
                tracing::debug!("comms connect failed: {}", e);
                Outcome::Dropped
            }
        };
        match outcome {
            // disconnect() already reset the shared state
            Outcome::Stopped => return,
            Outcome::AuthFailed => {
                inner.notifier.auth_failed();
                break;
            }
            Outcome::Dropped => {}
        }
        if *stop.borrow() {
            return;
        }
        inner.outbound.store(None);

        inner.set_state(ConnectionState::Disconnected);
        let attempts = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > inner.config.notify_after && !inner.notified.swap(true, Ordering::SeqCst) {
            inner.notifier.connection_lost();
        }

        let delay = inner.config.retry_delay(attempts);
        tracing::debug!(attempts, ?delay, "comms reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.wait_for(|stopped| *stopped) => return,
        }
    }

    // auth failure: retire this driver so a later connect() can start over
    own_stop.send_replace(true);
    inner.stop.rcu(|current| match current {
        Some(active) if Arc::ptr_eq(active, &own_stop) => None,
        other => other.clone(),
    });
    inner.outbound.store(None);
    inner.set_state(ConnectionState::Disconnected);
}
