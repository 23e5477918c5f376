/// Hierarchical configuration scopes
/// 
/// Flows and groups carry named environment-like declarations. A scope answers
/// lookups from its own declarations and delegates everything else to its
/// parent, ending at the process environment. Nodes resolve settings through
/// the innermost scope that encloses them.

// Declarations, kinds and the scope capability trait
pub mod types;

// Flow and group scopes with start-time coercion
pub mod group;

// Process environment root and `${NAME}` substitution
pub mod env;

pub use env::{evaluate_env_property, ProcessEnvScope};
pub use group::{ConfigScope, ScopeKind};
pub use types::{EnvDeclaration, EnvKind, Scope, ScopeError, PARENT_PREFIX};
