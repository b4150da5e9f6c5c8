//! Configuration loading for kb-sync.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/kb-sync/config.toml`.
//!
//! Knowledge bases are declared once each; the controller is generic over
//! them, so adding a knowledge base is a config change only.
//!
//! ```toml
//! [backend]
//! endpoint = "https://indexing.internal.example"
//!
//! [[knowledge_bases]]
//! id = "kb-inventory"
//! check_interval_hours = 24
//!
//! [[knowledge_bases.data_sources]]
//! id = "ds-inventory"
//! bucket = "inventory-knowledge-bucket"
//! deployment_resource = "inventoryKnowledgeDeployment"
//! ```

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::KbSyncError;

/// Where sync state lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// In-process map, for a long-lived daemon with a single tick driver
    #[default]
    Memory,
    /// RocksDB, required when the controller runs as short-lived invocations
    Rocksdb,
}

/// Sync state storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSettings {
    #[serde(default)]
    pub backend: StateBackend,

    /// Path to the RocksDB directory (used when backend = "rocksdb")
    #[serde(default = "default_state_path")]
    pub path: String,
}

fn default_state_path() -> String {
    ProjectDirs::from("", "", "kb-sync")
        .map(|p| p.data_local_dir().join("state"))
        .unwrap_or_else(|| PathBuf::from("./state"))
        .to_string_lossy()
        .to_string()
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: default_state_path(),
        }
    }
}

impl StateSettings {
    /// Expand ~ and environment variables in the state path.
    pub fn expanded_path(&self) -> PathBuf {
        match shellexpand::full(&self.path) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(&self.path),
        }
    }
}

/// Which indexing backend implementation to talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Http,
    /// In-memory backend for local dry runs
    Mock,
}

/// Indexing backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL of the indexing API
    #[serde(default = "default_backend_endpoint")]
    pub endpoint: String,

    /// Bearer token (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-call timeout; a timed out call is classified as transient.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_backend_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoint: default_backend_endpoint(),
            api_token: None,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Controller tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Upper bound on the periodic retry backoff, in ticks.
    #[serde(default = "default_max_backoff_ticks")]
    pub max_backoff_ticks: u32,

    /// How long an immediate sync waits for acceptance (0 = no limit).
    #[serde(default)]
    pub accept_timeout_secs: u64,
}

fn default_max_backoff_ticks() -> u32 {
    16
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_backoff_ticks: default_max_backoff_ticks(),
            accept_timeout_secs: 0,
        }
    }
}

/// Tick scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// IANA timezone used for cron schedules
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Deployment-completion filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Only status changes for this resource type count as deployments
    #[serde(default = "default_deployment_resource_type")]
    pub resource_type: String,

    /// Ledger markers older than this are pruned at startup; 0 keeps them forever
    #[serde(default = "default_deployment_retention_days")]
    pub retention_days: u32,
}

fn default_deployment_resource_type() -> String {
    "AWS::S3::BucketDeployment".to_string()
}

fn default_deployment_retention_days() -> u32 {
    30
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            resource_type: default_deployment_resource_type(),
            retention_days: default_deployment_retention_days(),
        }
    }
}

/// One data source of a knowledge base
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceSettings {
    pub id: String,

    /// Storage bucket whose change notifications map to this data source
    #[serde(default)]
    pub bucket: Option<String>,

    /// Logical id of the deployment resource that populates the bucket
    #[serde(default)]
    pub deployment_resource: Option<String>,
}

/// One knowledge base and its data sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeBaseSettings {
    pub id: String,

    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u32,

    /// Optional 6-field cron expression overriding the interval
    #[serde(default)]
    pub schedule: Option<String>,

    /// Max random delay before each tick fans out
    #[serde(default)]
    pub jitter_secs: u64,

    #[serde(default)]
    pub data_sources: Vec<DataSourceSettings>,
}

fn default_check_interval_hours() -> u32 {
    24
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// gRPC server port
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// gRPC server host
    #[serde(default = "default_grpc_host")]
    pub grpc_host: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub deployments: DeploymentSettings,

    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBaseSettings>,
}

fn default_grpc_port() -> u16 {
    50061
}

fn default_grpc_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grpc_port: default_grpc_port(),
            grpc_host: default_grpc_host(),
            log_level: default_log_level(),
            state: StateSettings::default(),
            backend: BackendSettings::default(),
            controller: ControllerSettings::default(),
            scheduler: SchedulerSettings::default(),
            deployments: DeploymentSettings::default(),
            knowledge_bases: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/kb-sync/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (KBSYNC_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, KbSyncError> {
        let config_dir = ProjectDirs::from("", "", "kb-sync")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .set_default("grpc_port", default_grpc_port() as i64)?
            .set_default("grpc_host", default_grpc_host())?
            .set_default("log_level", default_log_level())?
            .set_default("state.path", default_state_path())?
            .set_default("backend.endpoint", default_backend_endpoint())?
            .set_default("backend.call_timeout_ms", default_call_timeout_ms() as i64)?
            .set_default("controller.max_backoff_ticks", default_max_backoff_ticks() as i64)?
            // 2. Default config file
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        // 3. CLI-specified config file (higher precedence than default)
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables: KBSYNC_GRPC_PORT, KBSYNC_BACKEND__API_TOKEN, ...
        builder = builder.add_source(
            Environment::with_prefix("KBSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get the socket address for the gRPC server
    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.grpc_host, self.grpc_port)
    }

    /// Validate values that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), KbSyncError> {
        if self.controller.max_backoff_ticks == 0 {
            return Err(KbSyncError::Config(
                "controller.max_backoff_ticks must be > 0".to_string(),
            ));
        }
        if self.backend.call_timeout_ms == 0 {
            return Err(KbSyncError::Config(
                "backend.call_timeout_ms must be > 0".to_string(),
            ));
        }

        let mut kb_ids = HashSet::new();
        for kb in &self.knowledge_bases {
            if kb.id.is_empty() {
                return Err(KbSyncError::Config("knowledge base id is empty".to_string()));
            }
            if !kb_ids.insert(kb.id.as_str()) {
                return Err(KbSyncError::Config(format!(
                    "knowledge base {} declared twice",
                    kb.id
                )));
            }
            if kb.check_interval_hours == 0 && kb.schedule.is_none() {
                return Err(KbSyncError::Config(format!(
                    "knowledge base {}: check_interval_hours must be > 0",
                    kb.id
                )));
            }
            if kb.data_sources.iter().any(|ds| ds.id.is_empty()) {
                return Err(KbSyncError::Config(format!(
                    "knowledge base {}: data source id is empty",
                    kb.id
                )));
            }
        }
        Ok(())
    }
}
