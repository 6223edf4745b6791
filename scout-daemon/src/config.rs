//! Load config from file and environment.

use scout_core::protocol::DEFAULT_PORT;
use scout_core::IdentityRecord;
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/scout/config.toml or
/// /etc/scout/config.toml. Env overrides: SCOUT_PORT, SCOUT_IDENTITY.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 7991).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identity file path (default "identity" in the working directory).
    #[serde(default = "default_identity_path")]
    pub identity_path: PathBuf,
    /// Only bind these interfaces when set.
    #[serde(default)]
    pub allowed_interfaces: Option<Vec<String>>,
    /// Identity records advertised by the responder. Takes precedence over
    /// the identity file when present.
    #[serde(default)]
    pub identities: Option<Vec<IdentityRecord>>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_identity_path() -> PathBuf {
    PathBuf::from("identity")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            identity_path: default_identity_path(),
            allowed_interfaces: None,
            identities: None,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("SCOUT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("SCOUT_IDENTITY") {
        c.identity_path = PathBuf::from(s);
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/scout/config.toml"));
    }
    out.push(PathBuf::from("/etc/scout/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
