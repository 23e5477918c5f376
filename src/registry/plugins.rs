/// Plugin registry
///
/// Registration happens during the single-threaded load phase. Lookup tables
/// are swapped atomically (same ArcSwap pattern as the rest of the runtime), so
/// lookups during message processing never block and always see a complete
/// entry.

use crate::{
    events::{self, EventBus},
    registry::{
        i18n::{Catalog, Translator},
        modules::{ModuleRecord, PluginSetInfo},
    },
    runtime::{NodeConfig, NodeContext, NodeHandler},
};
use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

/// Category assigned to node types registered through `register_type`
pub const NODE_CATEGORY: &str = "node";

/// Constructor for a node type's behaviour
pub type NodeFactory =
    Arc<dyn Fn(&NodeConfig, &NodeContext) -> anyhow::Result<Box<dyn NodeHandler>> + Send + Sync>;

/// Wrap a closure as a node factory
pub fn node_factory<F>(f: F) -> NodeFactory
where
    F: Fn(&NodeConfig, &NodeContext) -> anyhow::Result<Box<dyn NodeHandler>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Hook invoked synchronously when a definition is added
pub type OnAdd = Arc<dyn Fn() + Send + Sync>;

/// Per-property settings metadata a plugin may declare
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSetting {
    /// Default value exported when the user has not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Whether the property may be exposed to the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exportable: Option<bool>,
}

/// A registered plugin or node type
#[derive(Clone, Default)]
pub struct PluginDefinition {
    /// Unique id, assigned at registration
    pub id: String,
    /// Category bucket (`type` in plugin manifests)
    pub kind: Option<String>,
    /// Owning module; `None` for locally defined types
    pub module: Option<String>,
    /// Default node properties
    pub defaults: Option<Map<String, Value>>,
    /// Settings metadata keyed by property (`*` sets the default)
    pub settings: BTreeMap<String, PluginSetting>,
    /// Node constructor, when the definition is instantiable
    pub handler: Option<NodeFactory>,
    /// Load hook
    pub onadd: Option<OnAdd>,
    translator: Option<Translator>,
}

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("module", &self.module)
            .field("defaults", &self.defaults)
            .field("settings", &self.settings)
            .field("handler", &self.handler.is_some())
            .field("onadd", &self.onadd.is_some())
            .finish()
    }
}

impl PluginDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn with_setting(mut self, property: impl Into<String>, setting: PluginSetting) -> Self {
        self.settings.insert(property.into(), setting);
        self
    }

    pub fn with_handler(mut self, handler: NodeFactory) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_onadd<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.onadd = Some(Arc::new(hook));
        self
    }

    /// Look up a message in the owning module's namespace
    pub fn t(&self, key: &str) -> String {
        match &self.translator {
            Some(t) => t.t(key),
            None => key.to_string(),
        }
    }

    /// The namespace this definition's lookups resolve in
    pub fn namespace(&self) -> Option<&str> {
        self.translator.as_ref().map(Translator::namespace)
    }
}

/// Registration faults; always raised synchronously at the call site
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{id}' is already registered{}", owner_suffix(.module))]
    Duplicate { id: String, module: Option<String> },

    #[error("plugin id must not be empty")]
    EmptyId,
}

fn owner_suffix(module: &Option<String>) -> String {
    match module {
        Some(m) => format!(" by module '{}'", m),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    plugins: HashMap<String, Arc<PluginDefinition>>,
    by_type: HashMap<String, Vec<Arc<PluginDefinition>>>,
}

/// Registry of plugin and node type definitions
pub struct PluginRegistry {
    bus: Arc<EventBus>,
    catalog: Arc<Catalog>,
    /// Reject duplicate ids instead of replacing
    strict: bool,
    tables: ArcSwap<Tables>,
    /// Module view; see `add_plugin`
    modules: ArcSwap<BTreeMap<String, ModuleRecord>>,
    /// Module whose definitions are currently being loaded
    loading_module: ArcSwapOption<String>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("strict", &self.strict)
            .field("plugins", &self.tables.load().plugins.len())
            .field("modules", &self.modules.load().len())
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry signalling on `bus`
    pub fn new(bus: Arc<EventBus>, catalog: Arc<Catalog>, strict: bool) -> Self {
        Self {
            bus,
            catalog,
            strict,
            tables: ArcSwap::new(Arc::new(Tables::default())),
            modules: ArcSwap::new(Arc::new(BTreeMap::new())),
            loading_module: ArcSwapOption::empty(),
        }
    }

    /// Run `load` with `module` as the module currently being loaded
    ///
    /// Definitions registered inside `load` without an explicit module are
    /// attributed to `module`, and their lookups are namespaced to it.
    pub fn load_module<R>(&self, module: &str, load: impl FnOnce(&Self) -> R) -> R {
        let previous = self.loading_module.swap(Some(Arc::new(module.to_string())));
        let result = load(self);
        self.loading_module.store(previous);
        result
    }

    /// Register `definition` under `id`
    ///
    /// Order of effects: store, category bucket, `onadd`, then the
    /// `registry:plugin-added` event, so listeners see a fully initialised
    /// entry. In strict mode a duplicate id is rejected; otherwise the prior
    /// entry is replaced and the event is emitted again.
    pub fn register_plugin(
        &self,
        id: &str,
        mut definition: PluginDefinition,
    ) -> Result<Arc<PluginDefinition>, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }

        if let Some(existing) = self.tables.load().plugins.get(id) {
            if self.strict {
                return Err(RegistryError::Duplicate {
                    id: id.to_string(),
                    module: existing.module.clone(),
                });
            }
            tracing::warn!(plugin = id, "replacing existing plugin definition");
        }

        definition.id = id.to_string();
        if definition.module.is_none() {
            definition.module = self.loading_module.load_full().map(|m| (*m).clone());
        }
        let namespace = definition.module.clone().unwrap_or_else(|| id.to_string());
        definition.translator = Some(Translator::new(namespace, Arc::clone(&self.catalog)));

        let definition = Arc::new(definition);
        self.tables.rcu(|current| {
            let mut next = Tables::clone(current);
            if let Some(old) = next.plugins.insert(id.to_string(), Arc::clone(&definition)) {
                if let Some(kind) = &old.kind {
                    if let Some(bucket) = next.by_type.get_mut(kind) {
                        bucket.retain(|d| !Arc::ptr_eq(d, &old));
                    }
                }
            }
            if let Some(kind) = &definition.kind {
                next.by_type
                    .entry(kind.clone())
                    .or_insert_with(Vec::new)
                    .push(Arc::clone(&definition));
            }
            next
        });

        if let Some(onadd) = &definition.onadd {
            onadd();
        }

        tracing::debug!(plugin = id, module = ?definition.module, "plugin registered");
        self.bus.emit(events::PLUGIN_ADDED, &Value::String(id.to_string()));
        Ok(definition)
    }

    /// Register a node type constructor
    pub fn register_type(
        &self,
        type_id: &str,
        factory: NodeFactory,
    ) -> Result<Arc<PluginDefinition>, RegistryError> {
        self.register_plugin(
            type_id,
            PluginDefinition::new()
                .with_type(NODE_CATEGORY)
                .with_handler(factory),
        )
    }

    pub fn get_plugin(&self, id: &str) -> Option<Arc<PluginDefinition>> {
        self.tables.load().plugins.get(id).cloned()
    }

    /// Definitions in category `kind`, in registration order
    pub fn get_plugins_by_type(&self, kind: &str) -> Vec<Arc<PluginDefinition>> {
        self.tables.load().by_type.get(kind).cloned().unwrap_or_default()
    }

    /// The constructor registered for a node type, if any
    pub fn get_node_factory(&self, type_id: &str) -> Option<NodeFactory> {
        self.get_plugin(type_id).and_then(|d| d.handler.clone())
    }

    /// Replace the module view with `list`
    pub fn set_plugin_list(&self, list: Vec<PluginSetInfo>) {
        self.modules.store(Arc::new(BTreeMap::new()));
        for entry in list {
            self.add_plugin(entry);
        }
    }

    /// Merge one catalog entry into the module view
    ///
    /// Creates the module record on first sight, then files the entry under
    /// its local name and emits `registry:plugin-module-added`.
    pub fn add_plugin(&self, entry: PluginSetInfo) {
        let module = entry.module.clone();
        self.modules.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            let record = next
                .entry(entry.module.clone())
                .or_insert_with(|| ModuleRecord::for_entry(&entry));
            record.merge(entry.clone());
            next
        });
        self.bus.emit(events::PLUGIN_MODULE_ADDED, &Value::String(module));
    }

    /// Snapshot of the module view
    pub fn get_module_list(&self) -> Arc<BTreeMap<String, ModuleRecord>> {
        self.modules.load_full()
    }

    /// Flattened module view with each entry's module version attached
    pub fn get_plugin_list(&self) -> Vec<PluginSetInfo> {
        let modules = self.modules.load();
        let mut list = Vec::new();
        for record in modules.values() {
            for set in record.sets.values() {
                let mut info = set.clone();
                info.version = record.version.clone();
                list.push(info);
            }
        }
        list
    }

    /// Add the exportable part of each plugin's user settings to `safe`
    ///
    /// A `*` entry with `exportable: true` exports everything the user set
    /// (minus properties explicitly marked `exportable: false`); otherwise only
    /// properties marked exportable are copied. Declared default values fill in
    /// properties the user left unset. Ids already present in `safe` are left
    /// untouched.
    pub fn export_plugin_settings(
        &self,
        user_settings: &Map<String, Value>,
        mut safe: Map<String, Value>,
    ) -> Map<String, Value> {
        let tables = self.tables.load();
        let mut ids: Vec<&String> = tables
            .plugins
            .iter()
            .filter(|(_, d)| !d.settings.is_empty())
            .map(|(id, _)| id)
            .collect();
        ids.sort();

        for id in ids {
            let Some(user) = user_settings.get(id.as_str()) else {
                continue;
            };
            if safe.contains_key(id.as_str()) {
                continue;
            }
            let settings = &tables.plugins[id].settings;
            let default_exportable = settings
                .get("*")
                .and_then(|s| s.exportable)
                .unwrap_or(false);

            let mut exported = if default_exportable {
                user.as_object().cloned().unwrap_or_default()
            } else {
                Map::new()
            };

            for (property, setting) in settings.iter().filter(|(p, _)| p.as_str() != "*") {
                if default_exportable {
                    if setting.exportable == Some(false) {
                        exported.remove(property);
                    } else if !exported.contains_key(property) {
                        if let Some(value) = &setting.value {
                            exported.insert(property.clone(), value.clone());
                        }
                    }
                } else if setting.exportable == Some(true) {
                    if let Some(value) = user.get(property) {
                        exported.insert(property.clone(), value.clone());
                    } else if let Some(value) = &setting.value {
                        exported.insert(property.clone(), value.clone());
                    }
                }
            }

            if !exported.is_empty() {
                safe.insert(id.clone(), Value::Object(exported));
            }
        }
        safe
    }
}
