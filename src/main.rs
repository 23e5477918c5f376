/// wireflow: runtime messaging and scoped-configuration core for flow-based automation
/// 
/// Main entry point for the wireflow server. Initializes configuration and starts
/// the HTTP server with the admin API and the comms channel.

use wireflow::{config::Config, server::start_server};

/// Application entry point
/// 
/// Initializes the server with default configuration and starts listening for requests.
/// The server provides:
/// - Flow deployment API at <admin_root>flows
/// - Realtime comms WebSocket at <admin_root>comms
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:1880, strict registry)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
