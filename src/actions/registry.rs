/// Action registry
///
/// Invoking an unknown action is a no-op so stale shortcut bindings never
/// break dispatch. Labels are computed lazily and cached per action.

use crate::registry::i18n::{Catalog, EDITOR_NAMESPACE};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

/// Callback run when an action is invoked
pub type ActionHandler = Arc<dyn Fn(&[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Options supplied with an action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOptions {
    /// Explicit label; takes precedence over catalog and derived labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Listing entry returned by `list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub id: String,
    /// Part of the id before the scope separator (e.g. `core`)
    pub scope: Option<String>,
    /// Bound shortcut, if any
    pub key: Option<String>,
    pub label: String,
    pub options: ActionOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action '{0}' is already registered")]
    Duplicate(String),

    #[error("action name must not be empty")]
    EmptyName,
}

struct Action {
    handler: ActionHandler,
    options: ActionOptions,
}

/// Registry of named actions
pub struct ActionRegistry {
    catalog: Arc<Catalog>,
    actions: ArcSwap<HashMap<String, Arc<Action>>>,
    /// Action -> shortcut
    bindings: ArcSwap<HashMap<String, String>>,
    /// Computed labels
    labels: ArcSwap<HashMap<String, String>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.actions.load().keys().cloned().collect();
        names.sort();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}

impl ActionRegistry {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            actions: ArcSwap::new(Arc::new(HashMap::new())),
            bindings: ArcSwap::new(Arc::new(HashMap::new())),
            labels: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register `handler` as `name`; an existing name is never overridden
    pub fn add<F>(&self, name: &str, handler: F, options: ActionOptions) -> Result<(), ActionError>
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(ActionError::EmptyName);
        }

        let action = Arc::new(Action {
            handler: Arc::new(handler),
            options,
        });
        let mut taken = false;
        self.actions.rcu(|current| {
            taken = current.contains_key(name);
            let mut next = HashMap::clone(current);
            if !taken {
                next.insert(name.to_string(), Arc::clone(&action));
            }
            next
        });
        if taken {
            return Err(ActionError::Duplicate(name.to_string()));
        }
        self.forget_label(name);

        tracing::debug!(action = name, "action added");
        Ok(())
    }

    /// Remove `name`; returns whether it existed
    pub fn remove(&self, name: &str) -> bool {
        let mut existed = false;
        self.actions.rcu(|current| {
            let mut next = HashMap::clone(current);
            existed = next.remove(name).is_some();
            next
        });
        self.forget_label(name);
        existed
    }

    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.actions.load().get(name).map(|a| Arc::clone(&a.handler))
    }

    /// Run the action called `name`
    ///
    /// Unknown names are ignored. A failing handler is logged, never
    /// propagated. Returns whether a handler ran.
    pub fn invoke(&self, name: &str, args: &[Value]) -> bool {
        let Some(handler) = self.get(name) else {
            tracing::debug!(action = name, "ignoring unknown action");
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(args))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(action = name, "action failed: {:#}", e),
            Err(_) => tracing::error!(action = name, "action panicked"),
        }
        true
    }

    /// Bind `key` as the shortcut for `name`
    pub fn bind_key(&self, name: &str, key: &str) {
        self.bindings.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.to_string(), key.to_string());
            next
        });
    }

    pub fn unbind_key(&self, name: &str) {
        self.bindings.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(name);
            next
        });
    }

    /// Human-readable label for `name`
    ///
    /// Explicit option label first, then `editor:action-list.<name>` from the
    /// catalog, then a label derived from the name itself.
    pub fn get_label(&self, name: &str) -> String {
        if let Some(label) = self.labels.load().get(name) {
            return label.clone();
        }

        let action = self.actions.load().get(name).cloned();
        let explicit = action.as_ref().and_then(|a| a.options.label.clone());
        let label = explicit
            .or_else(|| {
                self.catalog.lookup(&format!(
                    "{}:action-list.{}",
                    EDITOR_NAMESPACE,
                    unscoped(name)
                ))
            })
            .unwrap_or_else(|| derive_label(name));

        // only registered actions are cached
        if action.is_none() {
            return label;
        }
        self.labels.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.to_string(), label.clone());
            next
        });
        label
    }

    /// All actions with their bound shortcut, sorted by id
    pub fn list(&self) -> Vec<ActionSummary> {
        let actions = self.actions.load();
        let bindings = self.bindings.load();

        let mut ids: Vec<&String> = actions.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| ActionSummary {
                id: id.clone(),
                scope: id.split_once(':').map(|(scope, _)| scope.to_string()),
                key: bindings.get(id).cloned(),
                label: self.get_label(id),
                options: actions[id].options.clone(),
            })
            .collect()
    }

    fn forget_label(&self, name: &str) {
        self.labels.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(name);
            next
        });
    }
}

fn unscoped(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, rest)| rest)
}

/// `core:show-debug-tab` -> `Show Debug Tab`
fn derive_label(name: &str) -> String {
    unscoped(name)
        .split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn registry() -> ActionRegistry {
        ActionRegistry::new(Arc::new(Catalog::new()))
    }

    #[test]
    fn invoke_runs_handler_with_args() {
        let actions = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        actions
            .add(
                "core:deploy",
                move |args| {
                    s.lock().unwrap().extend(args.iter().cloned());
                    Ok(())
                },
                ActionOptions::default(),
            )
            .unwrap();

        assert!(actions.invoke("core:deploy", &[json!("full"), json!(1)]));
        assert_eq!(*seen.lock().unwrap(), vec![json!("full"), json!(1)]);
    }

    #[test]
    fn unknown_and_failing_actions_never_propagate() {
        let actions = registry();
        actions
            .add("core:explode", |_| Err(anyhow::anyhow!("nope")), ActionOptions::default())
            .unwrap();

        assert!(!actions.invoke("core:missing", &[]));
        assert!(actions.invoke("core:explode", &[]));
    }

    #[test]
    fn actions_cannot_be_overridden() {
        let actions = registry();
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        actions
            .add(
                "core:copy",
                move |_| {
                    *h.lock().unwrap() += 1;
                    Ok(())
                },
                ActionOptions::default(),
            )
            .unwrap();

        let err = actions
            .add("core:copy", |_| Ok(()), ActionOptions::default())
            .unwrap_err();
        assert!(matches!(err, ActionError::Duplicate(ref n) if n == "core:copy"));

        actions.invoke("core:copy", &[]);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn labels_prefer_explicit_then_catalog_then_derived() {
        let catalog = Arc::new(Catalog::new());
        catalog.register(EDITOR_NAMESPACE, [("action-list.toggle-palette", "Toggle the palette")]);
        let actions = ActionRegistry::new(catalog);
        let noop = |_: &[Value]| -> anyhow::Result<()> { Ok(()) };

        actions
            .add("core:show-debug-tab", noop, ActionOptions { label: Some("Debug".into()) })
            .unwrap();
        actions.add("core:toggle-palette", noop, ActionOptions::default()).unwrap();
        actions.add("core:show-node-help", noop, ActionOptions::default()).unwrap();

        assert_eq!(actions.get_label("core:show-debug-tab"), "Debug");
        assert_eq!(actions.get_label("core:toggle-palette"), "Toggle the palette");
        assert_eq!(actions.get_label("core:show-node-help"), "Show Node Help");
        assert_eq!(actions.get_label("plain"), "Plain");
    }

    #[test]
    fn label_read_before_add_does_not_mask_explicit_label() {
        let actions = registry();
        assert_eq!(actions.get_label("core:deploy"), "Deploy");

        actions
            .add("core:deploy", |_| Ok(()), ActionOptions { label: Some("Deploy now".into()) })
            .unwrap();
        assert_eq!(actions.get_label("core:deploy"), "Deploy now");
        assert!(actions.labels.load().contains_key("core:deploy"));

        assert_eq!(actions.get_label("core:unknown"), "Unknown");
        assert!(!actions.labels.load().contains_key("core:unknown"));
    }

    #[test]
    fn list_includes_bound_shortcuts() {
        let actions = registry();
        actions.add("core:b-action", |_| Ok(()), ActionOptions::default()).unwrap();
        actions.add("core:a-action", |_| Ok(()), ActionOptions::default()).unwrap();
        actions.bind_key("core:a-action", "ctrl-a");

        let listed = actions.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "core:a-action");
        assert_eq!(listed[0].key.as_deref(), Some("ctrl-a"));
        assert_eq!(listed[0].scope.as_deref(), Some("core"));
        assert_eq!(listed[0].label, "A Action");
        assert_eq!(listed[1].key, None);

        actions.unbind_key("core:a-action");
        assert_eq!(actions.list()[0].key, None);
    }

    #[test]
    fn remove_frees_the_name() {
        let actions = registry();
        actions.add("core:x", |_| Ok(()), ActionOptions::default()).unwrap();
        assert!(actions.remove("core:x"));
        assert!(!actions.remove("core:x"));
        assert!(actions.add("core:x", |_| Ok(()), ActionOptions::default()).is_ok());
    }
}
