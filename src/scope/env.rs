/// Process environment root scope and property substitution

use crate::scope::types::{Scope, PARENT_PREFIX};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static WHOLE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([^}]+)\}$").expect("valid whole-reference pattern"));
static EMBEDDED_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid embedded-reference pattern"));

/// Root of every scope chain: answers from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvScope;

impl Scope for ProcessEnvScope {
    fn get_setting(&self, name: &str) -> Option<Value> {
        if name.starts_with(PARENT_PREFIX) {
            // Nothing above the root
            return None;
        }
        std::env::var(name).ok().map(Value::String)
    }
}

/// Substitute environment references in a node property
///
/// - `${NAME}` alone yields the resolved value itself (any JSON type)
/// - `prefix${NAME}suffix` interpolates each reference as text
/// - a bare `NAME` is looked up directly
///
/// Unresolved references become empty strings.
pub fn evaluate_env_property(value: &str, scope: &dyn Scope) -> Value {
    if let Some(caps) = WHOLE_REFERENCE.captures(value) {
        return scope
            .get_setting(&caps[1])
            .unwrap_or_else(|| Value::String(String::new()));
    }

    if !EMBEDDED_REFERENCE.is_match(value) {
        return scope
            .get_setting(value)
            .unwrap_or_else(|| Value::String(String::new()));
    }

    let replaced = EMBEDDED_REFERENCE.replace_all(value, |caps: &regex::Captures<'_>| {
        match scope.get_setting(&caps[1]) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ConfigScope, EnvDeclaration, EnvKind, ScopeKind};
    use serde_json::json;
    use std::sync::Arc;

    fn scope() -> ConfigScope {
        let s = ConfigScope::new(
            ScopeKind::Flow,
            "f1",
            "Flow 1",
            vec![
                EnvDeclaration::new("WHO", EnvKind::String, "Joe"),
                EnvDeclaration::new("PORT", EnvKind::Number, "8080"),
            ],
            Some(Arc::new(ProcessEnvScope)),
        );
        s.start().unwrap();
        s
    }

    #[test]
    fn whole_reference_keeps_type() {
        assert_eq!(evaluate_env_property("${PORT}", &scope()), json!(8080));
    }

    #[test]
    fn embedded_references_interpolate() {
        assert_eq!(
            evaluate_env_property("Hello ${WHO} on ${PORT}${MISSING}!", &scope()),
            json!("Hello Joe on 8080!")
        );
    }

    #[test]
    fn bare_names_and_misses() {
        assert_eq!(evaluate_env_property("WHO", &scope()), json!("Joe"));
        assert_eq!(
            evaluate_env_property("WIREFLOW_SURELY_UNSET_VARIABLE", &scope()),
            json!("")
        );
    }

    #[test]
    fn root_scope_reads_process_environment() {
        let root = ProcessEnvScope;
        let path = std::env::var("PATH").ok().map(Value::String);
        assert_eq!(root.get_setting("PATH"), path);
        assert_eq!(root.get_setting("$parent.PATH"), None);
    }
}
