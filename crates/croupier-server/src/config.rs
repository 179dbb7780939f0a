//! Server configuration

use croupier_gateway::GatewayConfig;

/// Port the HTTP API listens on.
pub const HTTP_PORT: u16 = 3000;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Game server connection settings
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: HTTP_PORT,
            log_json: false,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Route all sessions to the game server at `host:port`.
    pub fn with_game_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.gateway = self.gateway.with_remote(host, port);
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
