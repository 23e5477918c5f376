/// Runtime service object
///
/// One instance per process. Holds the shared bus, registries and the root
/// scope, and tracks deployed flows by id.

use crate::{
    actions::ActionRegistry,
    config::Config,
    events::EventBus,
    registry::{Catalog, PluginRegistry},
    runtime::{flow::Flow, link, types::FlowConfig},
    scope::{ProcessEnvScope, Scope},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, fmt, sync::Arc};

/// Module name the built-in node types are registered under
pub const CORE_MODULE: &str = "wireflow";

pub struct Runtime {
    bus: Arc<EventBus>,
    catalog: Arc<Catalog>,
    registry: Arc<PluginRegistry>,
    actions: Arc<ActionRegistry>,
    root: Arc<dyn Scope>,
    flows: ArcSwap<HashMap<String, Arc<Flow>>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flows: Vec<String> = self.flows.load().keys().cloned().collect();
        flows.sort();
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("flows", &flows)
            .finish()
    }
}

impl Runtime {
    /// Build the shared services and register the built-in node types
    pub fn new(strict_registry: bool) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let catalog = Arc::new(Catalog::new());
        let registry = Arc::new(PluginRegistry::new(
            Arc::clone(&bus),
            Arc::clone(&catalog),
            strict_registry,
        ));
        let actions = Arc::new(ActionRegistry::new(Arc::clone(&catalog)));

        registry
            .load_module(CORE_MODULE, link::register_link_nodes)
            .map_err(|e| anyhow::anyhow!("Failed to register core node types: {}", e))?;

        Ok(Self {
            bus,
            catalog,
            registry,
            actions,
            root: Arc::new(ProcessEnvScope),
            flows: ArcSwap::new(Arc::new(HashMap::new())),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.registry.strict)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    /// Root of every flow's scope chain
    pub fn root_scope(&self) -> Arc<dyn Scope> {
        Arc::clone(&self.root)
    }

    /// Deploy `config`, replacing a running flow with the same id
    ///
    /// The previous flow keeps running when `config` is rejected.
    pub fn deploy(&self, config: FlowConfig) -> Result<Arc<Flow>> {
        let flow = Flow::deploy(config, self)?;
        let id = flow.id().to_string();
        let mut previous = None;
        self.flows.rcu(|current| {
            let mut next = HashMap::clone(current);
            previous = next.insert(id.clone(), Arc::clone(&flow));
            next
        });
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(flow)
    }

    pub fn flow(&self, id: &str) -> Option<Arc<Flow>> {
        self.flows.load().get(id).cloned()
    }

    /// Ids of deployed flows, sorted
    pub fn flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop and forget one flow; returns whether it was deployed
    pub fn stop_flow(&self, id: &str) -> bool {
        let mut stopped = None;
        self.flows.rcu(|current| {
            let mut next = HashMap::clone(current);
            stopped = next.remove(id);
            next
        });
        match stopped {
            Some(flow) => {
                flow.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every deployed flow
    pub fn stop_all(&self) {
        let flows = self.flows.swap(Arc::new(HashMap::new()));
        for flow in flows.values() {
            flow.stop();
        }
    }
}
