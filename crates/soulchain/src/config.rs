//! Workspace configuration.
//!
//! Loaded from `<workspace>/soulchain.config.json`. Every key is optional;
//! anything missing takes the default below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use soulchain_chain::{network, Network};
use soulchain_core::DocType;

use crate::classify::resolve_doc_type;
use crate::error::{Result, SoulError};

/// File name of the workspace configuration.
pub const CONFIG_FILE: &str = "soulchain.config.json";

/// Chain name accepted in place of a network preset for offline use.
pub const MOCK_CHAIN: &str = "mock";

/// How the ledger is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainSetting {
    /// A preset key such as `"base-sepolia"`, or `"mock"`.
    Named(String),
    Detailed(ChainConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainKind {
    Public,
    SelfHosted,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(rename = "type")]
    pub kind: ChainKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
}

impl ChainSetting {
    /// The network preset this setting names, if any.
    pub fn network(&self) -> Option<&'static Network> {
        match self {
            ChainSetting::Named(name) => network(name),
            ChainSetting::Detailed(c) if c.kind == ChainKind::Public => c.name.as_deref().and_then(network),
            ChainSetting::Detailed(_) => None,
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, ChainSetting::Named(name) if name == MOCK_CHAIN)
    }
}

impl Default for ChainSetting {
    fn default() -> Self {
        ChainSetting::Detailed(ChainConfig {
            kind: ChainKind::Public,
            name: Some("base-sepolia".into()),
            rpc_url: None,
            chain_id: None,
            contract_address: None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Ipfs,
    Arweave,
    #[default]
    Mock,
}

/// When writes reach the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Anchor inline on every write.
    #[default]
    OnWrite,
    /// Stage writes; a background worker drains them every interval.
    Interval,
    /// Stage writes; the caller drains them with [`SyncWorker::tick`].
    ///
    /// [`SyncWorker::tick`]: crate::worker::SyncWorker::tick
    Manual,
}

impl SyncMode {
    /// Whether writes go through the queue instead of anchoring inline.
    pub fn stages_writes(self) -> bool {
        self != SyncMode::OnWrite
    }

    /// Whether a background worker should drain the queue.
    pub fn runs_worker(self) -> bool {
        self == SyncMode::Interval
    }
}

/// Top-level workspace configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoulConfig {
    #[serde(default)]
    pub chain: ChainSetting,

    #[serde(default)]
    pub storage: StorageKind,

    #[serde(default = "default_keystore_path")]
    pub keystore_path: String,

    #[serde(default = "default_tracked_paths")]
    pub tracked_paths: Vec<String>,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Per-path doc type overrides, e.g. `{"notes/today.md": "daily"}`.
    #[serde(default)]
    pub doc_types: BTreeMap<String, DocType>,
}

fn default_keystore_path() -> String {
    "~/.soulchain/keystore.json".into()
}

fn default_tracked_paths() -> Vec<String> {
    ["SOUL.md", "MEMORY.md", "AGENTS.md", "USER.md"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_sync_interval_ms() -> u64 {
    5000
}

impl Default for SoulConfig {
    fn default() -> Self {
        Self {
            chain: ChainSetting::default(),
            storage: StorageKind::default(),
            keystore_path: default_keystore_path(),
            tracked_paths: default_tracked_paths(),
            sync_mode: SyncMode::default(),
            sync_interval_ms: default_sync_interval_ms(),
            doc_types: BTreeMap::new(),
        }
    }
}

impl SoulConfig {
    /// Load the workspace config, or the defaults if there is none.
    pub async fn load(workspace: impl AsRef<Path>) -> Result<Self> {
        let path = workspace.as_ref().join(CONFIG_FILE);
        let config = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Self::from_json(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SoulError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        match &self.chain {
            ChainSetting::Named(name) => {
                if name != MOCK_CHAIN && network(name).is_none() {
                    return Err(SoulError::Config(format!("invalid chain: {name}")));
                }
            }
            ChainSetting::Detailed(c) => {
                if c.kind == ChainKind::Custom && c.rpc_url.is_none() {
                    return Err(SoulError::Config("custom chain requires rpcUrl".into()));
                }
                if c.kind == ChainKind::Public {
                    if let Some(name) = &c.name {
                        if network(name).is_none() {
                            return Err(SoulError::Config(format!("invalid chain: {name}")));
                        }
                    }
                }
            }
        }
        if self.keystore_path.trim().is_empty() {
            return Err(SoulError::Config("keystorePath is required".into()));
        }
        if self.sync_interval_ms == 0 {
            return Err(SoulError::Config("syncIntervalMs must be positive".into()));
        }
        check_distinct_doc_types(&self.tracked_paths, &self.doc_types)
    }

    /// The keystore location, with `~/` expanded and relative paths taken
    /// from `workspace`.
    pub fn keystore_path_in(&self, workspace: &Path) -> PathBuf {
        if let Some(rest) = self.keystore_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        workspace.join(&self.keystore_path)
    }

    pub fn engine_config(&self, workspace: impl Into<PathBuf>) -> EngineConfig {
        EngineConfig {
            workspace_dir: workspace.into(),
            tracked_paths: self.tracked_paths.clone(),
            doc_type_overrides: self.doc_types.clone(),
            sync_mode: self.sync_mode,
        }
    }

    pub fn stages_writes(&self) -> bool {
        self.sync_mode.stages_writes()
    }

    pub fn runs_worker(&self) -> bool {
        self.sync_mode.runs_worker()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            interval: Duration::from_millis(self.sync_interval_ms),
            ..WorkerConfig::default()
        }
    }
}

/// What the sync engine needs to know about the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub workspace_dir: PathBuf,
    pub tracked_paths: Vec<String>,
    pub doc_type_overrides: BTreeMap<String, DocType>,
    pub sync_mode: SyncMode,
}

impl EngineConfig {
    /// Default tracked paths under `workspace`, no overrides.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        SoulConfig::default().engine_config(workspace)
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Each tracked path must resolve to its own doc type. Integrity checks
    /// compare a path with the latest version of its type, so two paths
    /// sharing a type would be checked against each other's content.
    pub fn validate(&self) -> Result<()> {
        check_distinct_doc_types(&self.tracked_paths, &self.doc_type_overrides)
    }
}

fn check_distinct_doc_types(paths: &[String], overrides: &BTreeMap<String, DocType>) -> Result<()> {
    let mut seen: BTreeMap<DocType, &str> = BTreeMap::new();
    for path in paths {
        let doc_type = resolve_doc_type(path, overrides);
        if let Some(other) = seen.insert(doc_type, path) {
            return Err(SoulError::Config(format!(
                "tracked paths {other} and {path} both resolve to doc type {doc_type}"
            )));
        }
    }
    Ok(())
}

/// Queue drain settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Time between drains; also the retry spacing.
    pub interval: Duration,
    /// Items claimed per drain.
    pub batch_size: usize,
    /// Attempts before a transient failure is left as failed.
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(default_sync_interval_ms()),
            batch_size: 10,
            max_retries: 5,
        }
    }
}
