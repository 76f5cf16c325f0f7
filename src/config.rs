use std::path::PathBuf;

/// Fixed network parameters. Not read from the environment: these define
/// the Kerma network itself, not a deployment's local configuration.
pub const VERSION: &str = "0.8.0";
pub const TARGET: &str = "00000002af000000000000000000000000000000000000000000000000000000";
pub const GENESIS_NONCE: &str = "0000000000000000000000000000000000000000000000000000002634878840";
pub const GENESIS_CREATED: i64 = 1624219079;
pub const GENESIS_MINER: &str = "dionyziz";
pub const GENESIS_NOTE: &str =
    "The Economist 2021-06-20: Crypto-miners are probably to blame for the graphics-chip shortage";
pub const BU: u64 = 1_000_000_000_000;
pub const BLOCK_REWARD: u64 = 50 * BU;

pub const DEFAULT_PORT: u16 = 18018;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Immutable configuration record assembled once at process start, then
/// threaded through constructors. No component reads `std::env` itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    pub bootstrap_nodes: Vec<String>,
    pub client_connections: usize,
    pub buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:18018".to_string());
        let storage_path = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data".to_string());
        let bootstrap_nodes = std::env::var("BOOTSTRAP_NODES")
            .unwrap_or_else(|_| "128.130.122.101:18018".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let client_connections = std::env::var("CLIENT_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8);
        let buffer_size = std::env::var("BUFFER_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_048_576);

        Self {
            listen_addr,
            storage_path: PathBuf::from(storage_path),
            bootstrap_nodes,
            client_connections,
            buffer_size,
        }
    }
}
