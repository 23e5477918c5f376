/// Realtime comms channel
/// 
/// A persistent, reconnecting publish/subscribe channel between the runtime
/// and its observers:
/// - MQTT-style topic patterns (`+` one segment, trailing `#` the rest)
/// - JSON frames over any text transport, WebSocket by default
/// - A client that survives disconnects without losing subscriptions
/// - A server-side hub republishing bus events with retained status

// Pattern compilation and matching
pub mod topic;

// Frames and errors
pub mod types;

// Connector trait, WebSocket connector, url derivation
pub mod transport;

// Reconnecting client
pub mod client;

// Server-side fan-out hub
pub mod hub;

pub use client::{callback, Callback, ClientConfig, CommsClient, ConnectionState, LogNotifier, Notifier};
pub use hub::{CommsHub, FrameOutcome, HubConfig, HubSession};
pub use topic::TopicMatcher;
pub use transport::{comms_url, Connection, Connector, WsConnector};
pub use types::{AuthStatus, ClientFrame, CommsError, ServerFrame, TopicMessage, HEARTBEAT_TOPIC};
