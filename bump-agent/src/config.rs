//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Agent configuration. File: ~/.config/bump/config.toml or
/// /etc/bump/config.toml. Env overrides: BUMP_API_BASE, BUMP_LINK_BASE,
/// BUMP_DISCOVERY_PORT, BUMP_TRANSPORT_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Claims service base URL (default http://127.0.0.1:3000).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Base URL for fallback claim links (default https://irl.app).
    #[serde(default = "default_link_base")]
    pub link_base: String,
    /// Discovery UDP port (default 45878).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Session transport TCP port (default 45879).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
}

fn default_api_base() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_link_base() -> String {
    bump_core::DEFAULT_LINK_BASE.to_string()
}
fn default_discovery_port() -> u16 {
    45878
}
fn default_transport_port() -> u16 {
    45879
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            link_base: default_link_base(),
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("BUMP_API_BASE") {
        if !s.is_empty() {
            c.api_base = s;
        }
    }
    if let Ok(s) = std::env::var("BUMP_LINK_BASE") {
        if !s.is_empty() {
            c.link_base = s;
        }
    }
    if let Ok(s) = std::env::var("BUMP_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("BUMP_TRANSPORT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transport_port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/bump/config.toml"));
    }
    out.push(PathBuf::from("/etc/bump/config.toml"));
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
