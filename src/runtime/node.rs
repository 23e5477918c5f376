/// Node behaviour and the per-node runtime context

use crate::{
    events::{self, EventBus},
    runtime::{flow::Flow, message::Message},
    scope::{evaluate_env_property, EnvDeclaration, Scope},
};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

/// Behaviour of one deployed node, built by its type's factory
pub trait NodeHandler: Send + Sync {
    /// Handle a message arriving on the node's input
    fn on_input(&self, msg: Message, ctx: &NodeContext) -> anyhow::Result<()>;

    /// Release anything registered at construction
    fn close(&self, _ctx: &NodeContext) {}
}

/// What a node sees of the runtime
///
/// Settings resolve through the innermost enclosing scope. The flow is held
/// weakly so contexts captured by bus handlers never keep a stopped flow alive.
#[derive(Debug, Clone)]
pub struct NodeContext {
    id: String,
    name: String,
    node_type: String,
    scope: Arc<dyn Scope>,
    bus: Arc<EventBus>,
    flow: Weak<Flow>,
}

impl NodeContext {
    pub(crate) fn new(
        id: &str,
        name: &str,
        node_type: &str,
        scope: Arc<dyn Scope>,
        bus: Arc<EventBus>,
        flow: Weak<Flow>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            node_type: node_type.to_string(),
            scope,
            bus,
            flow,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Substitute `${NAME}` references in a node property
    pub fn evaluate_property(&self, value: &str) -> Value {
        evaluate_env_property(value, self)
    }

    /// Send on output port 0
    pub fn send(&self, msg: Message) {
        self.send_to_port(0, msg);
    }

    /// Send one message per port; `None` skips that port
    pub fn send_ports(&self, msgs: Vec<Option<Message>>) {
        for (port, msg) in msgs.into_iter().enumerate() {
            if let Some(msg) = msg {
                self.send_to_port(port, msg);
            }
        }
    }

    /// Re-enter this node's own input handler
    pub fn receive(&self, msg: Message) {
        match self.flow.upgrade() {
            Some(flow) => flow.receive(&self.id, msg),
            None => tracing::debug!(node = %self.id, "flow stopped, dropping message"),
        }
    }

    /// Publish a status update for observers
    pub fn status(&self, status: Value) {
        self.bus.emit(events::NODE_STATUS, &json!({ "id": self.id, "status": status }));
    }

    fn send_to_port(&self, port: usize, msg: Message) {
        match self.flow.upgrade() {
            Some(flow) => flow.send(&self.id, port, msg),
            None => tracing::debug!(node = %self.id, "flow stopped, dropping message"),
        }
    }
}

impl Scope for NodeContext {
    fn get_setting(&self, name: &str) -> Option<Value> {
        match name {
            "NR_NODE_ID" => Some(Value::String(self.id.clone())),
            "NR_NODE_NAME" => Some(Value::String(self.name.clone())),
            _ => self.scope.get_setting(name),
        }
    }

    fn declaration(&self, name: &str) -> Option<EnvDeclaration> {
        self.scope.declaration(name)
    }
}
