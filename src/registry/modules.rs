/// Module grouping view
///
/// Catalog/palette listings group contributed entries by the distributable
/// module that shipped them. Each module record keeps its version, whether it
/// was installed locally, and its sets keyed by local name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One contributed set, as listed in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSetInfo {
    /// `module/name`
    pub id: String,
    /// Local name within the module
    pub name: String,
    /// Owning module name
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub local: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Plugin ids contributed by this set
    #[serde(default)]
    pub plugins: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl PluginSetInfo {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        let module = module.into();
        let name = name.into();
        Self {
            id: format!("{}/{}", module, name),
            name,
            module,
            version: None,
            local: false,
            enabled: true,
            plugins: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// Mark as installed from a local path rather than a registry
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }
}

/// A module and the sets it contributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub version: Option<String>,
    pub local: bool,
    /// Local name -> set
    pub sets: BTreeMap<String, PluginSetInfo>,
}

impl ModuleRecord {
    /// Empty record seeded from the first entry seen for a module
    pub fn for_entry(entry: &PluginSetInfo) -> Self {
        Self {
            name: entry.module.clone(),
            version: entry.version.clone(),
            local: entry.local,
            sets: BTreeMap::new(),
        }
    }

    /// File `entry` under its local name, replacing any previous set
    pub fn merge(&mut self, entry: PluginSetInfo) {
        if self.version.is_none() {
            self.version = entry.version.clone();
        }
        self.sets.insert(entry.name.clone(), entry);
    }
}
