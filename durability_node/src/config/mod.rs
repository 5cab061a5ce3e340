// Configuration module for the durability node
//
// This module handles loading and managing the node configuration. Files are
// TOML; every value has a default so a partial file is valid, and environment
// variables of the form DURABILITY__SECTION__KEY override file values.

use crate::error::{DurabilityError, Result};
use crate::gateway::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durability node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API configuration
    pub api: ApiConfig,
    /// Static storage node list
    pub nodes: Vec<NodeConfig>,
    /// Node health probing
    pub health: HealthConfig,
    /// Gateway pool and routing
    pub gateways: GatewayConfig,
    /// Replica placement
    pub replication: ReplicationConfig,
    /// Availability scanning and the replication queue
    pub availability: AvailabilityConfig,
    /// Archival deals
    pub archival: ArchivalConfig,
    /// Chunked ingest
    pub ingest: IngestConfig,
    /// External pinning services
    pub pinning: PinningConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API bind address
    pub bind_address: String,
    /// API port
    pub port: u16,
    /// Maximum request body size in bytes (chunk uploads)
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 4001,
            max_body_size: 16 * 1024 * 1024,
        }
    }
}

impl ApiConfig {
    /// Socket address string for the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Static description of one storage node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,
    /// RPC endpoint (`http://host:5001`, or `memory://name` for an in-process node)
    pub endpoint: String,
    /// Optional region label
    #[serde(default)]
    pub region: Option<String>,
    /// Placement priority, 0..=100
    #[serde(default = "default_node_priority")]
    pub priority: u8,
}

fn default_node_priority() -> u8 {
    100
}

/// Node health probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between full probe cycles in seconds
    pub probe_interval_secs: u64,
    /// Timeout for one node probe in milliseconds
    pub probe_timeout_ms: u64,
    /// Consecutive failures before a node is marked unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 60,
            probe_timeout_ms: 5000,
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Gateway pool and routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Built-in public gateways
    pub public: Vec<String>,
    /// Operator-supplied gateways
    pub custom: Vec<String>,
    /// CID requested by synthetic probes
    pub probe_cid: String,
    /// Interval between full probe cycles in seconds
    pub probe_interval_secs: u64,
    /// Timeout for a probe or fetch attempt in milliseconds
    pub request_timeout_ms: u64,
    /// Consecutive failures before a gateway is marked unavailable
    pub failure_threshold: u32,
    /// Maximum endpoints attempted by one fetch
    pub fallback_count: usize,
    /// Lifetime of a cached selection in seconds
    pub selection_cache_secs: u64,
    /// Strategy used when a caller does not name one
    pub default_strategy: SelectionStrategy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            public: default_public_gateways(),
            custom: Vec::new(),
            probe_cid: "QmTkzDwWqPbnAh5YiV5VwcTLnGdwSNsNTn2aDxdXBFca7D".to_string(),
            probe_interval_secs: 300,
            request_timeout_ms: 5000,
            failure_threshold: 3,
            fallback_count: 3,
            selection_cache_secs: 300,
            default_strategy: SelectionStrategy::Fastest,
        }
    }
}

impl GatewayConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn selection_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.selection_cache_secs)
    }
}

fn default_public_gateways() -> Vec<String> {
    [
        "https://ipfs.io/ipfs/",
        "https://dweb.link/ipfs/",
        "https://cloudflare-ipfs.com/ipfs/",
        "https://gateway.pinata.cloud/ipfs/",
        "https://ipfs.fleek.co/ipfs/",
        "https://gateway.ipfs.io/ipfs/",
        "https://ipfs.infura.io/ipfs/",
        "https://ipfs.runfission.com/ipfs/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Replica placement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Replicas requested on initial placement
    pub min_replicas: usize,
    /// Upper bound accepted for manual replication requests
    pub max_replicas: usize,
    /// Write placements skip nodes below this priority unless none clear it
    pub write_priority_threshold: u8,
    /// Timeout for a single pin or upload call in milliseconds
    pub pin_timeout_ms: u64,
    /// Node health older than this is refreshed before placement, in seconds
    pub fresh_within_secs: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            min_replicas: 3,
            max_replicas: 5,
            write_priority_threshold: 80,
            pin_timeout_ms: 120_000,
            fresh_within_secs: 30,
        }
    }
}

impl ReplicationConfig {
    pub fn pin_timeout(&self) -> Duration {
        Duration::from_millis(self.pin_timeout_ms)
    }

    pub fn fresh_within(&self) -> Duration {
        Duration::from_secs(self.fresh_within_secs)
    }
}

/// Availability scan and replication queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Interval between availability scans in seconds
    pub scan_interval_secs: u64,
    /// Interval between replication queue drains in seconds
    pub replication_interval_secs: u64,
    /// Jobs taken from the queue per drain
    pub jobs_per_tick: usize,
    /// Failed attempts after which a job is dropped
    pub max_attempts: u32,
    /// Target replica count for newly registered content
    pub default_target_replicas: usize,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            replication_interval_secs: 30,
            jobs_per_tick: 1,
            max_attempts: 3,
            default_target_replicas: 3,
        }
    }
}

impl AvailabilityConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn replication_interval(&self) -> Duration {
        Duration::from_secs(self.replication_interval_secs)
    }
}

/// Archival client implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivalBackend {
    /// Deterministic in-process client
    Simulated,
    /// Lotus JSON-RPC endpoint
    Lotus,
}

/// Archival deal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    /// Which client to construct
    pub backend: ArchivalBackend,
    /// Lotus JSON-RPC URL
    pub api_url: String,
    /// Lotus API token
    pub token: Option<String>,
    /// Wallet paying for deals
    pub wallet_address: Option<String>,
    /// Storage providers eligible for deals
    pub miners: Vec<String>,
    /// Deal duration in days
    pub storage_days: u64,
    /// Price per epoch in attoFIL
    pub price_atto_fil: String,
    /// Directory for the deal ledger and retrieval output
    pub data_dir: PathBuf,
    /// Ledger file name inside `data_dir`
    pub ledger_file: String,
    /// Interval between deal submission passes in seconds
    pub scheduler_interval_secs: u64,
    /// Interval between deal status passes in seconds
    pub poller_interval_secs: u64,
    /// Timeout for archival network calls in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            backend: ArchivalBackend::Simulated,
            api_url: "http://127.0.0.1:1234/rpc/v0".to_string(),
            token: None,
            wallet_address: None,
            miners: vec![
                "t01000".to_string(),
                "t01001".to_string(),
                "t01002".to_string(),
            ],
            storage_days: 180,
            price_atto_fil: "1000000000".to_string(),
            data_dir: PathBuf::from("data"),
            ledger_file: "filecoin-deals.db".to_string(),
            scheduler_interval_secs: 3600,
            poller_interval_secs: 900,
            request_timeout_ms: 30_000,
        }
    }
}

impl ArchivalConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn poller_interval(&self) -> Duration {
        Duration::from_secs(self.poller_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Chunked ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory for chunk staging files
    pub temp_dir: PathBuf,
    /// Uploads idle longer than this are swept, in seconds
    pub stale_after_secs: u64,
    /// Interval between janitor passes in seconds
    pub janitor_interval_secs: u64,
    /// Finished upload entries stay queryable this long, in seconds
    pub finished_retention_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("temp"),
            stale_after_secs: 24 * 60 * 60,
            janitor_interval_secs: 60 * 60,
            finished_retention_secs: 60 * 60,
        }
    }
}

impl IngestConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_secs)
    }
}

/// External pinning service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinningConfig {
    /// Pinata API base URL
    pub pinata_api_url: String,
    /// Pinata API key; the service is registered only when key and secret are set
    pub pinata_api_key: Option<String>,
    /// Pinata API secret
    pub pinata_secret_key: Option<String>,
    /// Timeout for pinning service calls in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            pinata_api_url: "https://api.pinata.cloud".to_string(),
            pinata_api_key: None,
            pinata_secret_key: None,
            request_timeout_ms: 30_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .map_err(|e| DurabilityError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| DurabilityError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file layered with DURABILITY__* environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("DURABILITY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| DurabilityError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, config_str)
            .map_err(|e| DurabilityError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values the components cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if node.priority > 100 {
                return Err(DurabilityError::Config(format!(
                    "Node {} priority must be within 0..=100",
                    node.id
                )));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(DurabilityError::Config(format!(
                    "Duplicate node id: {}",
                    node.id
                )));
            }
        }

        for gateway in self.gateways.public.iter().chain(self.gateways.custom.iter()) {
            if !gateway.ends_with("/ipfs/") {
                return Err(DurabilityError::Config(format!(
                    "Gateway URL must end with /ipfs/: {}",
                    gateway
                )));
            }
        }

        if self.replication.min_replicas == 0 {
            return Err(DurabilityError::Config(
                "replication.min_replicas must be at least 1".to_string(),
            ));
        }
        if self.replication.max_replicas < self.replication.min_replicas {
            return Err(DurabilityError::Config(
                "replication.max_replicas must not be below min_replicas".to_string(),
            ));
        }
        if self.availability.jobs_per_tick == 0 || self.availability.max_attempts == 0 {
            return Err(DurabilityError::Config(
                "availability.jobs_per_tick and max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Generate a default configuration file at the given path if it doesn't exist
pub fn ensure_default_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    if !path.as_ref().exists() {
        let mut default_config = Config::default();
        default_config.nodes = vec![NodeConfig {
            id: "local".to_string(),
            endpoint: "http://127.0.0.1:5001".to_string(),
            region: None,
            priority: default_node_priority(),
        }];
        default_config.to_file(&path)?;

        for dir in [
            &default_config.archival.data_dir,
            &default_config.ingest.temp_dir,
        ] {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    DurabilityError::Config(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        return Ok(default_config);
    }

    Config::from_file(path)
}
