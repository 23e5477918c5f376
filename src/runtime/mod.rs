/// Flow runtime
/// 
/// The thin deployment host around the core components:
/// - Messages exchanged between nodes
/// - Flow definitions and their deployment into scopes, wiring and handlers
/// - The node context handed to every node behaviour
/// - The link relay node types
/// - The `Runtime` service object holding the shared instances

// Message model
pub mod message;

// Flow, group and node definitions
pub mod types;

// Node behaviour trait and per-node context
pub mod node;

// Deployment, wiring and delivery
pub mod flow;

// "link in" / "link out"
pub mod link;

// Shared services and deployed flows
pub mod host;

pub use flow::Flow;
pub use host::Runtime;
pub use message::{Message, EVENT_FIELD};
pub use node::{NodeContext, NodeHandler};
pub use types::{parse_flows, FlowConfig, GroupConfig, NodeConfig};
