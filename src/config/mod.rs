/// Configuration management for the wireflow runtime
/// 
/// Handles server binding, comms channel tuning, registry strictness and the
/// flow file deployed at start.

use crate::comms::HubConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Comms channel configuration
    pub comms: CommsConfig,
    /// Type registry configuration
    pub registry: RegistryConfig,
    /// Flows deployed at start
    pub flows: FlowsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Path prefix for admin routes and the comms endpoint (e.g., "/admin")
    pub admin_root: String,
}

impl ServerConfig {
    /// `admin_root` with exactly one leading and one trailing `/`
    pub fn admin_prefix(&self) -> String {
        let trimmed = self.admin_root.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        }
    }

    /// Path the comms WebSocket is served on
    pub fn comms_path(&self) -> String {
        format!("{}comms", self.admin_prefix())
    }
}

/// Comms hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommsConfig {
    /// Idle time before a heartbeat is sent
    pub keepalive_secs: u64,
    /// How long publications are collected before a batch is flushed
    pub batch_window_ms: u64,
    /// Maximum messages per batch frame
    pub batch_size: usize,
    /// Token observers must authenticate with; open when unset
    pub auth_token: Option<String>,
}

impl CommsConfig {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            batch_window: Duration::from_millis(self.batch_window_ms),
            batch_size: self.batch_size,
            keepalive: Duration::from_secs(self.keepalive_secs),
            auth_token: self.auth_token.clone(),
        }
    }
}

/// Type registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Reject duplicate plugin ids instead of replacing them
    pub strict: bool,
}

/// Flow loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// JSON flow file deployed at start (one flow or an array)
    pub flows_file: Option<String>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("WIREFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("WIREFLOW_PORT")
                    .unwrap_or_else(|_| "1880".to_string())
                    .parse()
                    .unwrap_or(1880),
                admin_root: std::env::var("WIREFLOW_ADMIN_ROOT").unwrap_or_else(|_| "/".to_string()),
            },
            comms: CommsConfig {
                keepalive_secs: std::env::var("WIREFLOW_COMMS_KEEPALIVE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
                batch_window_ms: 50,
                batch_size: 50,
                auth_token: std::env::var("WIREFLOW_COMMS_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            registry: RegistryConfig {
                strict: std::env::var("WIREFLOW_STRICT_REGISTRY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(true),
            },
            flows: FlowsConfig {
                flows_file: std::env::var("WIREFLOW_FLOWS_FILE").ok().filter(|f| !f.is_empty()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(admin_root: &str) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            admin_root: admin_root.into(),
        }
    }

    #[test]
    fn comms_path_normalises_admin_root() {
        assert_eq!(server("/").comms_path(), "/comms");
        assert_eq!(server("").comms_path(), "/comms");
        assert_eq!(server("admin").comms_path(), "/admin/comms");
        assert_eq!(server("/admin/").comms_path(), "/admin/comms");
    }

    #[test]
    fn hub_config_converts_units() {
        let comms = CommsConfig {
            keepalive_secs: 15,
            batch_window_ms: 50,
            batch_size: 10,
            auth_token: None,
        };
        let hub = comms.hub_config();
        assert_eq!(hub.keepalive, Duration::from_secs(15));
        assert_eq!(hub.batch_window, Duration::from_millis(50));
        assert_eq!(hub.batch_size, 10);
    }
}
