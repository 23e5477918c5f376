/// Process-wide event bus
/// 
/// Synchronous publish/subscribe keyed by event name. Every other component
/// (registry, link relay, comms hub) signals through one shared instance that
/// is constructed at process start and handed to whoever needs it.

// Handler table and dispatch
pub mod bus;

pub use bus::{handler, EventBus, Handler};

/// Emitted after a plugin definition is registered (payload: plugin id)
pub const PLUGIN_ADDED: &str = "registry:plugin-added";

/// Emitted after an entry is merged into the module view (payload: module name)
pub const PLUGIN_MODULE_ADDED: &str = "registry:plugin-module-added";

/// Node status updates, republished to comms observers as `status/<id>`
pub const NODE_STATUS: &str = "node-status";

/// Runtime notifications, republished as `notification/<id>`
pub const RUNTIME_EVENT: &str = "runtime-event";

/// Raw comms publications (`{topic, data, retain}`)
pub const COMMS: &str = "comms";

/// Event log lines, republished as `event-log/<id>`
pub const EVENT_LOG: &str = "event-log";

/// Derive the bus event name a graph node listens on
/// 
/// This is the link addressing contract: `"node:" + id`.
pub fn node_event(node_id: &str) -> String {
    format!("node:{}", node_id)
}
