//! Configuration resolution for peerlink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/peerlink/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`PEERLINK_*`)
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Placeholder substituted with the display address in `url_format`.
pub const ADDRESS_PLACEHOLDER: &str = "%s";

/// Longest accepted JWT lifetime (30 days).
pub const MAX_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Complete peerlink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub peers: PeerConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peer connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Connection URL template with a single `%s` for the display address.
    pub url_format: String,
    /// Peer id of this process; its own address is never dialled.
    pub self_id: Option<String>,
    /// Re-run the last snapshot this often when adds failed (0 disables).
    pub resync_interval_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            url_format: "wss://%s/v3/connect".to_string(),
            self_id: None,
            resync_interval_secs: 30,
        }
    }
}

/// Membership source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Path of the membership document to poll.
    pub path: Option<PathBuf>,
    /// Only accept documents for this service (`namespace/name`).
    pub service: Option<String>,
    /// Poll interval (seconds).
    pub poll_interval_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            path: None,
            service: None,
            poll_interval_secs: 5,
        }
    }
}

/// How peer tokens are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenMode {
    /// One shared token read from `token_file`.
    #[default]
    Static,
    /// A signed JWT per peer, keyed by `jwt_secret_file`.
    Jwt,
}

impl std::str::FromStr for TokenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(Self::Static),
            "jwt" => Ok(Self::Jwt),
            other => Err(Error::Config(format!(
                "Unknown token mode '{other}' (expected 'static' or 'jwt')"
            ))),
        }
    }
}

/// Peer token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub mode: TokenMode,
    /// Shared peer token file (static mode).
    pub token_file: Option<PathBuf>,
    /// HMAC secret file (jwt mode).
    pub jwt_secret_file: Option<PathBuf>,
    /// JWT lifetime in seconds.
    pub ttl_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            mode: TokenMode::Static,
            token_file: None,
            jwt_secret_file: None,
            ttl_secs: 3600,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let placeholders = self.peers.url_format.matches(ADDRESS_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(Error::Config(format!(
                "url_format must contain exactly one '{ADDRESS_PLACEHOLDER}', found {placeholders}"
            )));
        }
        if self.membership.poll_interval_secs == 0 {
            return Err(Error::Config(
                "membership.poll_interval_secs must be greater than zero".into(),
            ));
        }
        if let Some(service) = &self.membership.service {
            if service.split_once('/').is_none_or(|(ns, name)| ns.is_empty() || name.is_empty()) {
                return Err(Error::Config(format!(
                    "membership.service must be 'namespace/name', got '{service}'"
                )));
            }
        }
        match self.token.mode {
            TokenMode::Static if self.token.token_file.is_none() => Err(Error::Config(
                "token.token_file is required in static token mode".into(),
            )),
            TokenMode::Jwt if self.token.jwt_secret_file.is_none() => Err(Error::Config(
                "token.jwt_secret_file is required in jwt token mode".into(),
            )),
            TokenMode::Jwt if !(1..=MAX_TOKEN_TTL_SECS).contains(&self.token.ttl_secs) => {
                Err(Error::Config(format!(
                    "token.ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}, got {}",
                    self.token.ttl_secs
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `config_path` must exist; the global file is optional.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    // Load explicit config
    if let Some(path) = config_path {
        let explicit = load_config_file(path)?;
        merge_config(&mut config, explicit);
    }

    // Apply environment overrides
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".peerlink").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/peerlink/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("peerlink").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// A config file as written: keys it leaves out keep the lower layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    peers: PeerFile,
    membership: MembershipFile,
    token: TokenFile,
    logging: LoggingFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PeerFile {
    url_format: Option<String>,
    self_id: Option<String>,
    resync_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MembershipFile {
    path: Option<PathBuf>,
    service: Option<String>,
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenFile {
    mode: Option<TokenMode>,
    token_file: Option<PathBuf>,
    jwt_secret_file: Option<PathBuf>,
    ttl_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingFile {
    level: Option<String>,
    json: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn merge_config(base: &mut Config, overlay: ConfigFile) {
    let ConfigFile {
        peers,
        membership,
        token,
        logging,
    } = overlay;

    set(&mut base.peers.url_format, peers.url_format);
    set(&mut base.peers.self_id, peers.self_id.map(Some));
    set(&mut base.peers.resync_interval_secs, peers.resync_interval_secs);

    set(&mut base.membership.path, membership.path.map(Some));
    set(&mut base.membership.service, membership.service.map(Some));
    set(&mut base.membership.poll_interval_secs, membership.poll_interval_secs);

    set(&mut base.token.mode, token.mode);
    set(&mut base.token.token_file, token.token_file.map(Some));
    set(&mut base.token.jwt_secret_file, token.jwt_secret_file.map(Some));
    set(&mut base.token.ttl_secs, token.ttl_secs);

    set(&mut base.logging.level, logging.level);
    set(&mut base.logging.json, logging.json);
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("PEERLINK_URL_FORMAT") {
        config.peers.url_format = val;
    }
    if let Some(val) = lookup("PEERLINK_SELF_ID") {
        config.peers.self_id = Some(val);
    }
    if let Some(val) = lookup("PEERLINK_RESYNC_INTERVAL") {
        if let Ok(n) = val.parse() {
            config.peers.resync_interval_secs = n;
        }
    }
    if let Some(val) = lookup("PEERLINK_MEMBERSHIP_PATH") {
        config.membership.path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PEERLINK_SERVICE") {
        config.membership.service = Some(val);
    }
    if let Some(val) = lookup("PEERLINK_POLL_INTERVAL") {
        if let Ok(n) = val.parse() {
            config.membership.poll_interval_secs = n;
        }
    }
    if let Some(val) = lookup("PEERLINK_TOKEN_MODE") {
        if let Ok(mode) = val.parse() {
            config.token.mode = mode;
        }
    }
    if let Some(val) = lookup("PEERLINK_TOKEN_FILE") {
        config.token.token_file = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PEERLINK_JWT_SECRET_FILE") {
        config.token.jwt_secret_file = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PEERLINK_TOKEN_TTL") {
        if let Ok(n) = val.parse() {
            config.token.ttl_secs = n;
        }
    }
    if let Some(val) = lookup("PEERLINK_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("PEERLINK_LOG_JSON") {
        config.logging.json = matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}
