use crate::error::{BulkError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Size of the pool that processes inbound frames for all sessions.
    #[serde(default = "default_inbound_workers")]
    pub inbound_workers: usize,
}

fn default_port() -> u16 {
    8480
}

fn default_inbound_workers() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            inbound_workers: default_inbound_workers(),
        }
    }
}

// ---------------------------------------------------------------------------
// LockConfig / SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: u64,
}

fn default_max_hold_secs() -> u64 {
    600
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_hold_secs: default_max_hold_secs(),
        }
    }
}

impl LockConfig {
    pub fn max_hold(&self) -> Duration {
        Duration::from_secs(self.max_hold_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
}

fn default_parallel_workers() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel_workers: default_parallel_workers(),
        }
    }
}

// ---------------------------------------------------------------------------
// CatalogConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(paths::CATALOG_FILE)
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionConfig
// ---------------------------------------------------------------------------

/// One bulk endpoint: the command run once per selected target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Only targets with a connection of this kind (e.g. `db`) are selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_connection: Option<String>,
}

impl ActionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// ReportConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportConfig>,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Default config with `cleanup` and `refresh` endpoints wired to
    /// placeholder scripts under `.bulkops/actions/`.
    pub fn new() -> Self {
        let mut actions = BTreeMap::new();
        actions.insert(
            "cleanup".to_string(),
            ActionConfig {
                command: ".bulkops/actions/cleanup.sh".to_string(),
                args: Vec::new(),
                timeout_secs: Some(900),
                requires_connection: Some("db".to_string()),
            },
        );
        actions.insert(
            "refresh".to_string(),
            ActionConfig {
                command: ".bulkops/actions/refresh.sh".to_string(),
                args: Vec::new(),
                timeout_secs: Some(900),
                requires_connection: Some("db".to_string()),
            },
        );
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            lock: LockConfig::default(),
            scheduler: SchedulerConfig::default(),
            catalog: CatalogConfig::default(),
            actions,
            report: None,
        }
    }

    pub fn action(&self, name: &str) -> Result<&ActionConfig> {
        self.actions
            .get(name)
            .ok_or_else(|| BulkError::UnknownAction(name.to_string()))
    }

    pub fn catalog_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.catalog.path)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            BulkError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Check for values that would make the server misbehave at runtime.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.server.inbound_workers == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "server.inbound_workers must be at least 1".to_string(),
            });
        }
        if self.scheduler.parallel_workers == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "scheduler.parallel_workers must be at least 1".to_string(),
            });
        }
        if self.lock.max_hold_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "lock.max_hold_secs must be greater than 0".to_string(),
            });
        }
        if self.actions.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no actions configured: the server exposes no bulk endpoints"
                    .to_string(),
            });
        }

        for (name, action) in &self.actions {
            if !is_valid_action_name(name) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "action '{name}': names may only contain letters, digits, '-' and '_'"
                    ),
                });
            }
            if action.command.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("action '{name}': command is empty"),
                });
            }
            if action.timeout_secs == Some(0) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "action '{name}': timeout_secs is 0, every target will time out"
                    ),
                });
            }
        }

        if let Some(url) = self.report.as_ref().and_then(|r| r.webhook_url.as_deref()) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("report.webhook_url '{url}' must start with http:// or https://"),
                });
            }
        }

        warnings
    }
}

/// Action names become URL path segments.
pub fn is_valid_action_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
