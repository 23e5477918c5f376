/// Named-command table
/// 
/// Actions are invoked by name from keyboard shortcuts, menus and other
/// extensions. Registration is first-come: an action name can never be taken
/// over by a later registration.

// Action table, shortcut bindings and label derivation
pub mod registry;

pub use registry::{ActionError, ActionHandler, ActionOptions, ActionRegistry, ActionSummary};
