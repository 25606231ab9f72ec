use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [sessions]
//                    event_queue_capacity = 200
//
//   env var:         HUB_SESSIONS__EVENT_QUEUE_CAPACITY=200   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub sessions: SessionsFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub sandbox: SandboxFileConfig,
}

/// Listener address (lives under `[server]` in config.toml).
/// CLI flags win over both fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Per-tenant session tunables (lives under `[sessions]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionsFileConfig {
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default = "default_user_server")]
    pub default_user_server: String,
    #[serde(default = "default_min_phone_digits")]
    pub min_phone_digits: usize,
}

impl Default for SessionsFileConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            default_user_server: default_user_server(),
            min_phone_digits: default_min_phone_digits(),
        }
    }
}

/// Bearer-token auth (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// In-process sandbox network (lives under `[sandbox]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pairing_code_ttl_secs")]
    pub pairing_code_ttl_secs: u64,
}

impl Default for SandboxFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pairing_code_ttl_secs: default_pairing_code_ttl_secs(),
        }
    }
}

fn default_event_queue_capacity() -> usize {
    100
}
fn default_user_server() -> String {
    messaging_client::DEFAULT_USER_SERVER.to_string()
}
fn default_min_phone_digits() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_pairing_code_ttl_secs() -> u64 {
    60
}

/// Build a figment that layers: defaults → config.toml → HUB_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `HUB_AUTH__ENABLED=false`  →  `auth.enabled = false`
///   `HUB_SANDBOX__PAIRING_CODE_TTL_SECS=30`  →  `sandbox.pairing_code_ttl_secs = 30`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("HUB_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SessionsConfig {
    /// Inbound events buffered per tenant before new ones are dropped
    pub event_queue_capacity: usize,
    /// Server part used when turning phone numbers into addresses
    pub default_user_server: String,
    pub min_phone_digits: usize,
}

impl SessionsConfig {
    pub fn from_file(fc: &SessionsFileConfig) -> Self {
        Self {
            // a zero-capacity mpsc channel panics
            event_queue_capacity: fc.event_queue_capacity.max(1),
            default_user_server: fc.default_user_server.clone(),
            min_phone_digits: fc.min_phone_digits,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self::from_file(&SessionsFileConfig::default())
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// When false, loopback callers may pick a tenant with `X-Tenant-Id`
    pub enabled: bool,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub pairing_code_ttl: Duration,
}

impl SandboxConfig {
    pub fn from_file(fc: &SandboxFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
            pairing_code_ttl: Duration::from_secs(fc.pairing_code_ttl_secs),
        }
    }

    pub fn network_config(&self) -> messaging_client::sandbox::SandboxConfig {
        messaging_client::sandbox::SandboxConfig {
            pairing_code_ttl: self.pairing_code_ttl,
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl HubConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".session-hub"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("hub.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
