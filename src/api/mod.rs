/// HTTP API Layer
/// 
/// This module provides the admin endpoints and the comms WebSocket. It handles:
/// - Flow deployment and teardown
/// - Plugin catalog and action listings
/// - Realtime comms for observers

// Flow, plugin and action endpoints
pub mod admin;

// Comms WebSocket endpoint
pub mod comms;

// Re-export router builders
pub use admin::{create_admin_routes, AppState};
pub use comms::create_comms_routes;
