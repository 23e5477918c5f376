/// Type registry and plugin manager
/// 
/// Maps stable type identifiers to their runtime definitions:
/// - Plugin definitions grouped by category, with load-time hooks
/// - Node type factories used by flow deployment
/// - The per-module catalog view used for palette/catalog listings
/// - Module-scoped message lookups for plugin authors

// Namespaced message tables and per-module translators
pub mod i18n;

// Plugin definitions, node factories and the registry itself
pub mod plugins;

// Module grouping view (module -> sets)
pub mod modules;

pub use i18n::{Catalog, Translator};
pub use modules::{ModuleRecord, PluginSetInfo};
pub use plugins::{node_factory, NodeFactory, PluginDefinition, PluginRegistry, PluginSetting, RegistryError};
