/// wireflow: runtime messaging and scoped-configuration core for flow-based automation
/// 
/// This library provides the pieces a flow runtime is built from: a synchronous
/// event bus, hierarchical configuration scopes, the plugin/type registry, the
/// action table, a reconnecting realtime comms channel and the link relay.

// Core configuration and setup
pub mod config;

// Process-wide event bus
pub mod events;

// Flow and group configuration scopes
pub mod scope;

// Plugin and node type registry
pub mod registry;

// Named, non-overridable actions
pub mod actions;

// Realtime comms channel (client, hub, topic patterns)
pub mod comms;

// Flow runtime - deployment, wiring, node contexts and link relay
pub mod runtime;

// HTTP API layer - admin endpoints and the comms WebSocket
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use actions::ActionRegistry;
pub use events::EventBus;
pub use registry::PluginRegistry;
pub use runtime::{Flow, FlowConfig, Message, NodeConfig, Runtime};
pub use scope::{ConfigScope, Scope};
pub use server::start_server;
