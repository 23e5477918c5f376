/// Namespaced message catalog
/// 
/// Keys are addressed as `namespace:key`. Each registered plugin receives a
/// Translator bound to its owning module's namespace, so plugin code can look
/// up its own messages with unqualified keys.

use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Namespace used for runtime-owned messages
pub const RUNTIME_NAMESPACE: &str = "runtime";

/// Namespace used for editor-facing labels (action names etc.)
pub const EDITOR_NAMESPACE: &str = "editor";

/// Shared message tables, one per namespace
#[derive(Debug)]
pub struct Catalog {
    tables: ArcSwap<HashMap<String, HashMap<String, String>>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Merge `entries` into `namespace`, replacing existing keys
    pub fn register<I, K, V>(&self, namespace: &str, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries: Vec<(String, String)> =
            entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.tables.rcu(|current| {
            let mut next = HashMap::clone(current);
            let table = next.entry(namespace.to_string()).or_insert_with(HashMap::new);
            for (k, v) in &entries {
                table.insert(k.clone(), v.clone());
            }
            next
        });
    }

    /// Look up a fully qualified `namespace:key`
    pub fn lookup(&self, qualified: &str) -> Option<String> {
        let (namespace, key) = qualified.split_once(':')?;
        self.tables.load().get(namespace)?.get(key).cloned()
    }

    /// Look up `qualified`, falling back to the key itself
    pub fn translate(&self, qualified: &str) -> String {
        self.lookup(qualified).unwrap_or_else(|| qualified.to_string())
    }
}

/// Lookup function scoped to one namespace
#[derive(Debug, Clone)]
pub struct Translator {
    namespace: String,
    catalog: Arc<Catalog>,
}

impl Translator {
    pub fn new(namespace: impl Into<String>, catalog: Arc<Catalog>) -> Self {
        Self {
            namespace: namespace.into(),
            catalog,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Translate `key`; unqualified keys are resolved in this namespace
    pub fn t(&self, key: &str) -> String {
        let qualified = if key.contains(':') {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        };
        self.catalog.lookup(&qualified).unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translator_namespaces_unqualified_keys() {
        let catalog = Arc::new(Catalog::new());
        catalog.register("my-module", [("greeting", "Hello"), ("label.name", "Name")]);
        catalog.register("other", [("greeting", "Bonjour")]);

        let t = Translator::new("my-module", Arc::clone(&catalog));
        assert_eq!(t.t("greeting"), "Hello");
        assert_eq!(t.t("label.name"), "Name");
        assert_eq!(t.t("other:greeting"), "Bonjour");
        assert_eq!(t.t("missing"), "missing");
    }

    #[test]
    fn register_merges_into_existing_namespace() {
        let catalog = Catalog::new();
        catalog.register("ns", [("a", "1")]);
        catalog.register("ns", [("b", "2"), ("a", "3")]);

        assert_eq!(catalog.lookup("ns:a").as_deref(), Some("3"));
        assert_eq!(catalog.lookup("ns:b").as_deref(), Some("2"));
        assert_eq!(catalog.lookup("unqualified"), None);
        assert_eq!(catalog.translate("ns:zzz"), "ns:zzz");
    }
}
