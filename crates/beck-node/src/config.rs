//! Node configuration.

use std::path::PathBuf;

use beck_core::address::Address;
use beck_core::constants::INITIAL_DIFFICULTY;

/// Default port for the mining JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 50051;

/// Default port for the HTTP read API.
pub const DEFAULT_API_PORT: u16 = 8080;

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Address rewarded by the genesis block when creating a fresh chain.
    pub genesis_address: Address,
    /// Bind address for the mining JSON-RPC server.
    pub rpc_bind: String,
    pub rpc_port: u16,
    /// Bind address for the HTTP read API.
    pub api_bind: String,
    pub api_port: u16,
    /// Difficulty used when creating a fresh chain.
    pub initial_difficulty: u32,
    /// Log level filter string (e.g. "info", "beck_node_lib=debug").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("beck-data"),
            genesis_address: Address::default(),
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            api_bind: "127.0.0.1".to_string(),
            api_port: DEFAULT_API_PORT,
            initial_difficulty: INITIAL_DIFFICULTY,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path to the block store directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Socket address string for the mining RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    /// Socket address string for the read API.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_bind, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(cfg.api_port, DEFAULT_API_PORT);
        assert_ne!(cfg.rpc_port, cfg.api_port);
    }

    #[test]
    fn default_binds_are_localhost() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_addr(), format!("127.0.0.1:{DEFAULT_RPC_PORT}"));
        assert_eq!(cfg.api_addr(), format!("127.0.0.1:{DEFAULT_API_PORT}"));
    }

    #[test]
    fn db_path_appends_chaindata() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/beck-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/beck-test/chaindata"));
    }

    #[test]
    fn default_initial_difficulty() {
        assert_eq!(NodeConfig::default().initial_difficulty, INITIAL_DIFFICULTY);
    }
}
