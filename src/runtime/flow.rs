/// Flow deployment
///
/// A deployed flow owns its scope chain, a wiring graph and one handler per
/// node. Wiring is a petgraph DiGraph whose edge weight is the output port;
/// delivery is synchronous and follows wire order.

use crate::{
    events::EventBus,
    registry::NodeFactory,
    runtime::{
        host::Runtime,
        message::Message,
        node::{NodeContext, NodeHandler},
        types::{FlowConfig, GroupConfig, NodeConfig},
    },
    scope::{ConfigScope, Scope, ScopeKind},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction,
};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

struct NodeInstance {
    context: NodeContext,
    handler: Box<dyn NodeHandler>,
}

/// A running flow
pub struct Flow {
    id: String,
    scope: Arc<ConfigScope>,
    groups: HashMap<String, Arc<ConfigScope>>,
    /// Node id per vertex; edge weight is the source output port
    graph: DiGraph<String, usize>,
    node_id_to_index: HashMap<String, NodeIndex>,
    /// Filled once every handler is constructed, emptied by `stop`
    nodes: ArcSwap<HashMap<String, Arc<NodeInstance>>>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("groups", &self.groups.len())
            .field("nodes", &self.graph.node_count())
            .field("wires", &self.graph.edge_count())
            .finish()
    }
}

impl Flow {
    /// Build scopes, wiring and node handlers for `config`
    ///
    /// Any failure (scope start, unknown group, wire target or node type,
    /// factory error) rejects the whole deploy; handlers already built are
    /// closed again.
    pub fn deploy(config: FlowConfig, runtime: &Runtime) -> Result<Arc<Flow>> {
        tracing::info!("🚀 Deploying flow {} ({} nodes)", config.id, config.nodes.len());

        let scope = Arc::new(ConfigScope::new(
            ScopeKind::Flow,
            config.id.clone(),
            config.label.clone(),
            config.env.clone(),
            Some(runtime.root_scope()),
        ));
        scope
            .start()
            .map_err(|e| anyhow::anyhow!("Failed to start flow {} scope: {}", config.id, e))?;

        let groups = build_group_scopes(&config.groups, &scope)?;

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();
        for node in &config.nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(anyhow::anyhow!("Duplicate node id: {}", node.id));
            }
            if let Some(g) = &node.g {
                if !groups.contains_key(g) {
                    return Err(anyhow::anyhow!("Node {} references unknown group: {}", node.id, g));
                }
            }
            let index = graph.add_node(node.id.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }
        for node in &config.nodes {
            let from = node_id_to_index[&node.id];
            for (port, targets) in node.wires.iter().enumerate() {
                for target in targets {
                    let to = node_id_to_index.get(target).ok_or_else(|| {
                        anyhow::anyhow!("Wire from {} references unknown node: {}", node.id, target)
                    })?;
                    graph.add_edge(from, *to, port);
                }
            }
        }
        tracing::debug!("📊 Wiring graph: {} nodes, {} wires", graph.node_count(), graph.edge_count());

        let factories = config
            .nodes
            .iter()
            .map(|node| {
                runtime
                    .registry()
                    .get_node_factory(&node.node_type)
                    .ok_or_else(|| {
                        anyhow::anyhow!("Unknown node type '{}' for node {}", node.node_type, node.id)
                    })
            })
            .collect::<Result<Vec<NodeFactory>>>()?;

        let flow = Arc::new(Flow {
            id: config.id.clone(),
            scope,
            groups,
            graph,
            node_id_to_index,
            nodes: ArcSwap::new(Arc::new(HashMap::new())),
        });

        let mut built: HashMap<String, Arc<NodeInstance>> = HashMap::new();
        for (node, factory) in config.nodes.iter().zip(factories) {
            let context = flow.context_for(node, runtime.bus());
            match factory(node, &context) {
                Ok(handler) => {
                    built.insert(node.id.clone(), Arc::new(NodeInstance { context, handler }));
                }
                Err(e) => {
                    for instance in built.values() {
                        instance.handler.close(&instance.context);
                    }
                    return Err(anyhow::anyhow!("Failed to create node {}: {}", node.id, e));
                }
            }
        }
        flow.nodes.store(Arc::new(built));

        tracing::info!("✅ Flow {} deployed", flow.id);
        Ok(flow)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The flow-level scope
    pub fn scope(&self) -> &Arc<ConfigScope> {
        &self.scope
    }

    pub fn group_scope(&self, group_id: &str) -> Option<&Arc<ConfigScope>> {
        self.groups.get(group_id)
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.load().contains_key(node_id)
    }

    /// Context of a deployed node
    pub fn node_context(&self, node_id: &str) -> Option<NodeContext> {
        self.nodes.load().get(node_id).map(|n| n.context.clone())
    }

    /// Deliver `msg` from `from`'s output `port` to each wired target
    ///
    /// The first target receives the original, every further target its
    /// own deep copy.
    pub fn send(&self, from: &str, port: usize, msg: Message) {
        let Some(&index) = self.node_id_to_index.get(from) else {
            tracing::warn!(node = from, "send from unknown node");
            return;
        };

        let mut wires: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .filter(|e| *e.weight() == port)
            .map(|e| (e.id(), e.target()))
            .collect();
        if wires.is_empty() {
            return;
        }
        wires.sort_by_key(|(edge, _)| edge.index());

        let mut msgs: Vec<Message> = (1..wires.len()).map(|_| msg.clone()).collect();
        msgs.insert(0, msg);
        for ((_, target), msg) in wires.into_iter().zip(msgs) {
            self.receive(&self.graph[target], msg);
        }
    }

    /// Run `node_id`'s input handler; failures are logged
    pub fn receive(&self, node_id: &str, msg: Message) {
        let Some(instance) = self.nodes.load().get(node_id).cloned() else {
            tracing::debug!(node = node_id, "dropping message for node that is not running");
            return;
        };
        if let Err(e) = instance.handler.on_input(msg, &instance.context) {
            tracing::warn!(node = node_id, node_type = instance.context.node_type(), "❌ Node failed: {:#}", e);
        }
    }

    /// Close every node; the flow delivers nothing afterwards
    pub fn stop(&self) {
        let nodes = self.nodes.swap(Arc::new(HashMap::new()));
        for instance in nodes.values() {
            instance.handler.close(&instance.context);
        }
        tracing::info!("🛑 Flow {} stopped ({} nodes closed)", self.id, nodes.len());
    }

    fn context_for(self: &Arc<Self>, node: &NodeConfig, bus: &Arc<EventBus>) -> NodeContext {
        let scope: Arc<dyn Scope> = match node.g.as_ref().and_then(|g| self.groups.get(g)) {
            Some(group) => Arc::clone(group) as Arc<dyn Scope>,
            None => Arc::clone(&self.scope) as Arc<dyn Scope>,
        };
        NodeContext::new(
            &node.id,
            &node.name,
            &node.node_type,
            scope,
            Arc::clone(bus),
            Arc::downgrade(self),
        )
    }
}

/// Build and start group scopes, parents before children
fn build_group_scopes(
    configs: &[GroupConfig],
    flow_scope: &Arc<ConfigScope>,
) -> Result<HashMap<String, Arc<ConfigScope>>> {
    let by_id: HashMap<&str, &GroupConfig> = configs.iter().map(|g| (g.id.as_str(), g)).collect();
    let mut built = HashMap::new();
    for group in configs {
        let mut visiting = HashSet::new();
        build_group(&group.id, &by_id, flow_scope, &mut built, &mut visiting)?;
    }
    Ok(built)
}

fn build_group(
    id: &str,
    by_id: &HashMap<&str, &GroupConfig>,
    flow_scope: &Arc<ConfigScope>,
    built: &mut HashMap<String, Arc<ConfigScope>>,
    visiting: &mut HashSet<String>,
) -> Result<Arc<ConfigScope>> {
    if let Some(scope) = built.get(id) {
        return Ok(Arc::clone(scope));
    }
    let config = by_id
        .get(id)
        .ok_or_else(|| anyhow::anyhow!("Unknown group: {}", id))?;
    if !visiting.insert(id.to_string()) {
        return Err(anyhow::anyhow!("Group nesting cycle at: {}", id));
    }

    let parent: Arc<dyn Scope> = match &config.g {
        Some(parent_id) => build_group(parent_id, by_id, flow_scope, built, visiting)?,
        None => Arc::clone(flow_scope) as Arc<dyn Scope>,
    };
    let scope = Arc::new(ConfigScope::group(
        config.id.clone(),
        config.name.clone(),
        config.env.clone(),
        parent,
    ));
    scope
        .start()
        .map_err(|e| anyhow::anyhow!("Failed to start group {} scope: {}", id, e))?;

    built.insert(id.to_string(), Arc::clone(&scope));
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::node_factory;
    use crate::scope::{EnvDeclaration, EnvKind};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, Message)>>>;

    /// Runtime with a `capture` type recording what each node receives, and
    /// a `mutate` type that rewrites the payload before forwarding
    fn runtime() -> (Runtime, Seen) {
        let runtime = Runtime::new(true).unwrap();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));

        struct Capture(Seen);
        impl NodeHandler for Capture {
            fn on_input(&self, msg: Message, ctx: &NodeContext) -> Result<()> {
                self.0.lock().unwrap().push((ctx.id().to_string(), msg));
                Ok(())
            }
        }
        struct Mutate;
        impl NodeHandler for Mutate {
            fn on_input(&self, mut msg: Message, ctx: &NodeContext) -> Result<()> {
                msg.set("payload", "mutated");
                ctx.send(msg);
                Ok(())
            }
        }

        let s = Arc::clone(&seen);
        runtime
            .registry()
            .register_type(
                "capture",
                node_factory(move |_, _| Ok(Box::new(Capture(Arc::clone(&s))) as Box<dyn NodeHandler>)),
            )
            .unwrap();
        runtime
            .registry()
            .register_type("mutate", node_factory(|_, _| Ok(Box::new(Mutate) as Box<dyn NodeHandler>)))
            .unwrap();
        (runtime, seen)
    }

    fn flow(nodes: Vec<NodeConfig>) -> FlowConfig {
        FlowConfig {
            id: "f1".into(),
            label: "Main".into(),
            env: vec![EnvDeclaration::new("LEVEL", EnvKind::Number, "3")],
            groups: vec![],
            nodes,
        }
    }

    #[test]
    fn fan_out_gives_each_target_its_own_copy() {
        let (runtime, seen) = runtime();
        let deployed = Flow::deploy(
            flow(vec![
                NodeConfig::new("src", "capture").with_wires(0, ["m", "b"]),
                NodeConfig::new("m", "mutate").with_wires(0, ["a"]),
                NodeConfig::new("a", "capture"),
                NodeConfig::new("b", "capture"),
            ]),
            &runtime,
        )
        .unwrap();

        deployed.send("src", 0, Message::new(json!("original")));

        let seen = seen.lock().unwrap();
        let order: Vec<&str> = seen.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(seen[0].1.payload(), Some(&json!("mutated")));
        assert_eq!(seen[1].1.payload(), Some(&json!("original")));
        assert_eq!(seen[0].1.msgid(), seen[1].1.msgid());
    }

    #[test]
    fn ports_are_kept_apart() {
        let (runtime, seen) = runtime();
        let deployed = Flow::deploy(
            flow(vec![
                NodeConfig::new("src", "capture").with_wires(0, ["a"]).with_wires(1, ["b"]),
                NodeConfig::new("a", "capture"),
                NodeConfig::new("b", "capture"),
            ]),
            &runtime,
        )
        .unwrap();

        deployed.send("src", 1, Message::new(1));
        deployed.send("src", 2, Message::new(2));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "b");
    }

    #[test]
    fn deploy_rejects_unknown_types_and_targets() {
        let (runtime, _) = runtime();

        let err = Flow::deploy(flow(vec![NodeConfig::new("a", "nope")]), &runtime).unwrap_err();
        assert!(err.to_string().contains("Unknown node type 'nope'"));

        let err = Flow::deploy(
            flow(vec![NodeConfig::new("a", "capture").with_wires(0, ["ghost"])]),
            &runtime,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown node: ghost"));

        let err = Flow::deploy(
            flow(vec![NodeConfig::new("a", "capture"), NodeConfig::new("a", "capture")]),
            &runtime,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate node id"));
    }

    #[test]
    fn deploy_rejects_bad_declarations() {
        let (runtime, _) = runtime();
        let mut config = flow(vec![]);
        config.env = vec![EnvDeclaration::new("N", EnvKind::Number, "abc")];
        assert!(Flow::deploy(config, &runtime).is_err());
    }

    #[test]
    fn nodes_resolve_through_nested_groups() {
        let (runtime, _) = runtime();
        let mut config = flow(vec![
            NodeConfig::new("inner", "capture").with_name("Inner").in_group("g2"),
            NodeConfig::new("loose", "capture"),
        ]);
        config.groups = vec![
            GroupConfig {
                id: "g2".into(),
                name: "Child".into(),
                g: Some("g1".into()),
                env: vec![EnvDeclaration::new("COLOUR", EnvKind::String, "blue")],
            },
            GroupConfig {
                id: "g1".into(),
                name: "Parent".into(),
                g: None,
                env: vec![EnvDeclaration::new("COLOUR", EnvKind::String, "red")],
            },
        ];
        let deployed = Flow::deploy(config, &runtime).unwrap();

        let inner = deployed.node_context("inner").unwrap();
        assert_eq!(inner.get_setting("COLOUR"), Some(json!("blue")));
        assert_eq!(inner.get_setting("$parent.COLOUR"), Some(json!("red")));
        assert_eq!(inner.get_setting("NR_GROUP_NAME"), Some(json!("Child")));
        assert_eq!(inner.get_setting("NR_NODE_NAME"), Some(json!("Inner")));
        assert_eq!(inner.get_setting("LEVEL"), Some(json!(3)));

        let loose = deployed.node_context("loose").unwrap();
        assert_eq!(loose.get_setting("COLOUR"), None::<Value>);
        assert_eq!(loose.get_setting("NR_FLOW_ID"), Some(json!("f1")));
    }

    #[test]
    fn group_cycles_are_rejected() {
        let (runtime, _) = runtime();
        let mut config = flow(vec![]);
        config.groups = vec![
            GroupConfig { id: "a".into(), name: String::new(), g: Some("b".into()), env: vec![] },
            GroupConfig { id: "b".into(), name: String::new(), g: Some("a".into()), env: vec![] },
        ];
        let err = Flow::deploy(config, &runtime).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn stopped_flows_deliver_nothing() {
        let (runtime, seen) = runtime();
        let deployed = Flow::deploy(
            flow(vec![NodeConfig::new("a", "capture").with_wires(0, ["b"]), NodeConfig::new("b", "capture")]),
            &runtime,
        )
        .unwrap();

        deployed.stop();
        deployed.send("a", 0, Message::new(1));
        assert!(!deployed.has_node("b"));
        assert!(seen.lock().unwrap().is_empty());
    }
}
