use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;

/// Largest reply batch the server will assemble, matching `maxBsonObjectSize`.
pub const DEFAULT_MAX_REPLY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub max_reply_bytes: usize,
    pub cursor_timeout_secs: Option<u64>,
    pub cursor_sweep_interval_secs: Option<u64>,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Default to Mongo's standard port locally
            listen_addr: "127.0.0.1:27017".to_string(),
            max_reply_bytes: DEFAULT_MAX_REPLY_BYTES,
            cursor_timeout_secs: None,
            cursor_sweep_interval_secs: None,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub scram_iterations: u32,
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scram_iterations: 15_000,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub user: String,
    #[serde(default = "default_auth_db")]
    pub db: String,
    pub password: String,
    #[serde(default)]
    pub privileges: Vec<PrivilegeConfig>,
}

/// A grant in config form. `db` + `collection` targets one namespace, `db`
/// alone a whole database, neither every non-system collection.
#[derive(Debug, Clone, Deserialize)]
pub struct PrivilegeConfig {
    pub db: Option<String>,
    pub collection: Option<String>,
    pub actions: Vec<String>,
}

fn default_auth_db() -> String {
    "admin".to_string()
}

impl Config {
    /// Priority: the given file (if present) → env → defaults
    pub fn load_from(path: &str) -> Result<Self> {
        let mut cfg = match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| Error::Msg(format!("Failed to parse {}: {}", path, e)))?,
            Err(_) => Config::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str::<Config>(contents).map_err(|e| Error::Msg(e.to_string()))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("IDXLIST_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(bytes) = std::env::var("IDXLIST_MAX_REPLY_BYTES") {
            self.max_reply_bytes = bytes
                .parse()
                .map_err(|_| Error::Msg(format!("IDXLIST_MAX_REPLY_BYTES is not a number: {}", bytes)))?;
        }
        Ok(())
    }
}
