/// Link relay nodes
///
/// "link in" listens on the bus under its own derived event name and feeds
/// what arrives into its wires. "link out" publishes to the derived event name
/// of every target it links to. Publishing to a name nobody listens on is a
/// no-op, which is normal while a graph is being redeployed.

use crate::{
    events::{self, EventBus, Handler},
    registry::{node_factory, PluginRegistry, RegistryError},
    runtime::{
        message::{Message, EVENT_FIELD},
        node::{NodeContext, NodeHandler},
        types::NodeConfig,
    },
};
use serde_json::Value;
use std::sync::Arc;

pub const LINK_IN: &str = "link in";
pub const LINK_OUT: &str = "link out";

/// Register both link roles with `registry`
pub fn register_link_nodes(registry: &PluginRegistry) -> Result<(), RegistryError> {
    registry.register_type(
        LINK_IN,
        node_factory(|_, ctx| Ok(Box::new(LinkIn::attach(ctx)) as Box<dyn NodeHandler>)),
    )?;
    registry.register_type(
        LINK_OUT,
        node_factory(|config, ctx| Ok(Box::new(LinkOut::new(config, ctx)) as Box<dyn NodeHandler>)),
    )?;
    Ok(())
}

/// Receiving end; owns one bus registration for its lifetime
struct LinkIn {
    event: String,
    handler: Handler,
}

impl LinkIn {
    fn attach(ctx: &NodeContext) -> Self {
        let event = events::node_event(ctx.id());
        let own_event = event.clone();
        let forward = ctx.clone();
        let handler = events::handler(move |value| {
            let mut msg = Message::from_value(value.clone());
            if msg.get(EVENT_FIELD).is_none() {
                msg.set(EVENT_FIELD, own_event.clone());
            }
            forward.send(msg);
            Ok(())
        });
        ctx.bus().on(&event, Arc::clone(&handler));
        tracing::debug!(node = ctx.id(), event = %event, "link in attached");
        Self { event, handler }
    }
}

impl NodeHandler for LinkIn {
    fn on_input(&self, msg: Message, ctx: &NodeContext) -> anyhow::Result<()> {
        ctx.send(msg);
        Ok(())
    }

    fn close(&self, ctx: &NodeContext) {
        ctx.bus().off(&self.event, &self.handler);
    }
}

/// Sending end
struct LinkOut {
    /// Derived event names to publish on
    targets: Vec<String>,
    /// Provenance stamped on published copies
    provenance: String,
}

impl LinkOut {
    fn new(config: &NodeConfig, ctx: &NodeContext) -> Self {
        let mut targets: Vec<String> = config
            .prop("links")
            .and_then(Value::as_array)
            .map(|links| {
                links
                    .iter()
                    .filter_map(Value::as_str)
                    .map(events::node_event)
                    .collect()
            })
            .unwrap_or_default();
        // An explicit event name addresses listeners outside the link scheme
        if let Some(event) = config.prop_str("event") {
            targets.push(event.to_string());
        }
        Self {
            targets,
            provenance: events::node_event(ctx.id()),
        }
    }

    fn publish(&self, bus: &EventBus, msg: &Message) {
        if self.targets.is_empty() {
            return;
        }
        let mut stamped = msg.clone();
        stamped.set(EVENT_FIELD, self.provenance.clone());
        let payload = stamped.into_value();
        for target in &self.targets {
            bus.emit(target, &payload);
        }
    }
}

impl NodeHandler for LinkOut {
    fn on_input(&self, msg: Message, ctx: &NodeContext) -> anyhow::Result<()> {
        self.publish(ctx.bus(), &msg);
        ctx.send(msg);
        Ok(())
    }
}
