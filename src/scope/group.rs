/// Flow and group configuration scopes
///
/// A scope is built when its owning flow or group is deployed, started once
/// (coercing every declaration into its typed value) and then only read. The
/// prepared table is published through an ArcSwapOption so readers never block
/// and never see a half-built table.

use crate::scope::types::{EnvDeclaration, EnvKind, Scope, ScopeError, PARENT_PREFIX};
use arc_swap::ArcSwapOption;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Which grouping a scope belongs to; decides its self-identity keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A flow (tab); answers `NR_FLOW_NAME` / `NR_FLOW_ID`
    Flow,
    /// A group inside a flow; answers `NR_GROUP_NAME` / `NR_GROUP_ID`
    Group,
}

impl ScopeKind {
    fn name_key(self) -> &'static str {
        match self {
            ScopeKind::Flow => "NR_FLOW_NAME",
            ScopeKind::Group => "NR_GROUP_NAME",
        }
    }

    fn id_key(self) -> &'static str {
        match self {
            ScopeKind::Flow => "NR_FLOW_ID",
            ScopeKind::Group => "NR_GROUP_ID",
        }
    }
}

/// A named scope with an optional parent
///
/// The parent reference is only used for delegation; parents never know
/// their children, so the chain has no cycles.
#[derive(Debug)]
pub struct ConfigScope {
    kind: ScopeKind,
    id: String,
    name: String,
    /// Declarations in authoring order; later duplicates win
    env: Vec<EnvDeclaration>,
    parent: Option<Arc<dyn Scope>>,
    /// Coerced values, present once `start` has succeeded
    prepared: ArcSwapOption<HashMap<String, Value>>,
}

impl ConfigScope {
    /// Create an unstarted scope
    pub fn new(
        kind: ScopeKind,
        id: impl Into<String>,
        name: impl Into<String>,
        env: Vec<EnvDeclaration>,
        parent: Option<Arc<dyn Scope>>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            env,
            parent,
            prepared: ArcSwapOption::empty(),
        }
    }

    /// Shorthand for a group scope
    pub fn group(
        id: impl Into<String>,
        name: impl Into<String>,
        env: Vec<EnvDeclaration>,
        parent: Arc<dyn Scope>,
    ) -> Self {
        Self::new(ScopeKind::Group, id, name, env, Some(parent))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn is_started(&self) -> bool {
        self.prepared.load().is_some()
    }

    /// Validate and coerce every declaration
    ///
    /// A malformed declaration rejects the start; nothing is published in that
    /// case. Calling `start` again after success is a no-op.
    pub fn start(&self) -> Result<(), ScopeError> {
        if self.is_started() {
            return Ok(());
        }

        let mut prepared: HashMap<String, Value> = HashMap::with_capacity(self.env.len());
        for decl in &self.env {
            let value = match decl.kind {
                EnvKind::Env => {
                    // Reference: earlier local declarations first, then the chain
                    let target = decl.raw_text();
                    prepared
                        .get(&target)
                        .cloned()
                        .or_else(|| self.parent.as_ref().and_then(|p| p.get_setting(&target)))
                        .unwrap_or_else(|| Value::String(String::new()))
                }
                _ => self.coerce(decl)?,
            };
            prepared.insert(decl.name.clone(), value);
        }

        tracing::debug!(
            scope = %self.id,
            settings = prepared.len(),
            "scope started"
        );
        self.prepared.store(Some(Arc::new(prepared)));
        Ok(())
    }

    fn coerce(&self, decl: &EnvDeclaration) -> Result<Value, ScopeError> {
        match decl.kind {
            EnvKind::String | EnvKind::Expression => Ok(Value::String(decl.raw_text())),
            EnvKind::Number => {
                if let Value::Number(n) = &decl.value {
                    return Ok(Value::Number(n.clone()));
                }
                let text = decl.raw_text();
                let trimmed = text.trim();
                let number = trimmed
                    .parse::<i64>()
                    .map(serde_json::Number::from)
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64));
                number.map(Value::Number).ok_or_else(|| ScopeError::InvalidNumber {
                    scope: self.id.clone(),
                    name: decl.name.clone(),
                    value: text.clone(),
                })
            }
            EnvKind::Boolean => match &decl.value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                _ => match decl.raw_text().trim() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    other => Err(ScopeError::InvalidBoolean {
                        scope: self.id.clone(),
                        name: decl.name.clone(),
                        value: other.to_string(),
                    }),
                },
            },
            EnvKind::Json => match &decl.value {
                Value::String(text) => {
                    serde_json::from_str(text).map_err(|source| ScopeError::InvalidJson {
                        scope: self.id.clone(),
                        name: decl.name.clone(),
                        source,
                    })
                }
                structured => Ok(structured.clone()),
            },
            EnvKind::Env => Ok(Value::String(decl.raw_text())),
        }
    }

    fn local_declaration(&self, name: &str) -> Option<&EnvDeclaration> {
        self.env.iter().rev().find(|d| d.name == name)
    }

    fn delegate(&self, name: &str) -> Option<Value> {
        self.parent.as_ref().and_then(|p| p.get_setting(name))
    }
}

impl Scope for ConfigScope {
    fn get_setting(&self, name: &str) -> Option<Value> {
        if name == self.kind.name_key() {
            return Some(Value::String(self.name.clone()));
        }
        if name == self.kind.id_key() {
            return Some(Value::String(self.id.clone()));
        }
        if let Some(stripped) = name.strip_prefix(PARENT_PREFIX) {
            return self.delegate(stripped);
        }

        let prepared = self.prepared.load();
        match prepared.as_deref() {
            // Owned clone: json values come back as a fresh deep copy
            Some(prepared) => {
                if let Some(value) = prepared.get(name) {
                    return Some(value.clone());
                }
            }
            // Not started yet: hand back the raw declaration rather than guess
            None => {
                if let Some(decl) = self.local_declaration(name) {
                    return Some(Value::String(decl.raw_text()));
                }
            }
        }

        self.delegate(name)
    }

    fn declaration(&self, name: &str) -> Option<EnvDeclaration> {
        if let Some(stripped) = name.strip_prefix(PARENT_PREFIX) {
            return self.parent.as_ref().and_then(|p| p.declaration(stripped));
        }
        self.local_declaration(name)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.declaration(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(env: Vec<EnvDeclaration>) -> Arc<ConfigScope> {
        let scope = ConfigScope::new(ScopeKind::Flow, "f0", "Main", env, None);
        scope.start().unwrap();
        Arc::new(scope)
    }

    #[test]
    fn self_identity_keys_ignore_local_and_parent() {
        let parent = flow(vec![EnvDeclaration::new("NR_GROUP_NAME", EnvKind::String, "parent")]);
        let g1 = ConfigScope::group(
            "g-id",
            "g1",
            vec![EnvDeclaration::new("NR_GROUP_NAME", EnvKind::String, "local")],
            parent,
        );
        g1.start().unwrap();

        assert_eq!(g1.get_setting("NR_GROUP_NAME"), Some(json!("g1")));
        assert_eq!(g1.get_setting("NR_GROUP_ID"), Some(json!("g-id")));
    }

    #[test]
    fn flow_scope_answers_flow_identity() {
        let f = flow(vec![]);
        assert_eq!(f.get_setting("NR_FLOW_NAME"), Some(json!("Main")));
        assert_eq!(f.get_setting("NR_FLOW_ID"), Some(json!("f0")));
        assert_eq!(f.get_setting("NR_GROUP_NAME"), None);
    }

    #[test]
    fn delegates_misses_and_parent_prefixed_keys() {
        let g0 = ConfigScope::group(
            "g0",
            "outer",
            vec![EnvDeclaration::new("X", EnvKind::String, "v")],
            flow(vec![]),
        );
        g0.start().unwrap();
        let g1 = ConfigScope::group("g1", "inner", vec![], Arc::new(g0));
        g1.start().unwrap();

        assert_eq!(g1.get_setting("X"), Some(json!("v")));
        assert_eq!(g1.get_setting("$parent.X"), Some(json!("v")));
        assert_eq!(g1.get_setting("NOPE"), None);
    }

    #[test]
    fn parent_prefix_skips_local_definition() {
        let parent = flow(vec![EnvDeclaration::new("X", EnvKind::String, "outer")]);
        let g = ConfigScope::group(
            "g",
            "g",
            vec![EnvDeclaration::new("X", EnvKind::String, "inner")],
            parent,
        );
        g.start().unwrap();

        assert_eq!(g.get_setting("X"), Some(json!("inner")));
        assert_eq!(g.get_setting("$parent.X"), Some(json!("outer")));
    }

    #[test]
    fn json_reads_are_independent_copies() {
        let f = flow(vec![EnvDeclaration::new("CFG", EnvKind::Json, r#"{"a":1}"#)]);

        let mut first = f.get_setting("CFG").unwrap();
        let second = f.get_setting("CFG").unwrap();
        assert_eq!(first, second);

        first["a"] = json!(99);
        first["b"] = json!("added");

        assert_eq!(f.get_setting("CFG"), Some(json!({"a": 1})));
        assert_eq!(second, json!({"a": 1}));
    }

    #[test]
    fn typed_declarations_are_coerced_at_start() {
        let f = flow(vec![
            EnvDeclaration::new("N", EnvKind::Number, "3.5"),
            EnvDeclaration::new("I", EnvKind::Number, " 12 "),
            EnvDeclaration::new("B", EnvKind::Boolean, "false"),
            EnvDeclaration::new("E", EnvKind::Expression, "$flowContext('x')"),
            EnvDeclaration::new("R", EnvKind::Env, "I"),
        ]);

        assert_eq!(f.get_setting("N"), Some(json!(3.5)));
        assert_eq!(f.get_setting("I"), Some(json!(12)));
        assert_eq!(f.get_setting("B"), Some(json!(false)));
        assert_eq!(f.get_setting("E"), Some(json!("$flowContext('x')")));
        assert_eq!(f.get_setting("R"), Some(json!(12)));
        assert_eq!(f.declaration("E").map(|d| d.kind), Some(EnvKind::Expression));
    }

    #[test]
    fn malformed_json_rejects_start() {
        let scope = ConfigScope::new(
            ScopeKind::Group,
            "g",
            "broken",
            vec![EnvDeclaration::new("CFG", EnvKind::Json, "{not json")],
            None,
        );

        let err = scope.start().unwrap_err();
        assert!(matches!(err, ScopeError::InvalidJson { ref name, .. } if name == "CFG"));
        assert!(!scope.is_started());
    }

    #[test]
    fn malformed_number_and_boolean_reject_start() {
        let num = ConfigScope::new(
            ScopeKind::Flow,
            "f",
            "f",
            vec![EnvDeclaration::new("N", EnvKind::Number, "twelve")],
            None,
        );
        assert!(matches!(num.start(), Err(ScopeError::InvalidNumber { .. })));

        let flag = ConfigScope::new(
            ScopeKind::Flow,
            "f",
            "f",
            vec![EnvDeclaration::new("B", EnvKind::Boolean, "yes")],
            None,
        );
        assert!(matches!(flag.start(), Err(ScopeError::InvalidBoolean { .. })));
    }

    #[test]
    fn reads_before_start_return_raw_text() {
        let scope = ConfigScope::new(
            ScopeKind::Group,
            "g",
            "g",
            vec![EnvDeclaration::new("CFG", EnvKind::Json, r#"{"a":1}"#)],
            None,
        );

        assert_eq!(scope.get_setting("CFG"), Some(json!(r#"{"a":1}"#)));
        scope.start().unwrap();
        scope.start().unwrap();
        assert_eq!(scope.get_setting("CFG"), Some(json!({"a": 1})));
    }
}
