//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Daemon configuration. File: ~/.config/wearlink/config.toml or /etc/wearlink/config.toml.
/// Env overrides: WEARLINK_DISCOVERY_PORT, WEARLINK_TRANSPORT_PORT, WEARLINK_DISPLAY_NAME,
/// WEARLINK_LOG.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 45688).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transport TCP port (default 45689).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Name advertised to peers.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// tracing filter directive, used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_discovery_port() -> u16 {
    45688
}
fn default_transport_port() -> u16 {
    45689
}
fn default_display_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "wear-linux".to_string())
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            display_name: default_display_name(),
            log_filter: default_log_filter(),
        }
    }
}

/// Load config: default, then the first config file found, then env vars.
/// Logging is not up yet, so problems are returned as warnings for the caller to emit.
pub fn load() -> (Config, Vec<String>) {
    let mut warnings = Vec::new();
    let mut c = match load_file() {
        Some((_, Ok(c))) => c,
        Some((path, Err(e))) => {
            warnings.push(format!("ignoring {}: {}", path.display(), e));
            Config::default()
        }
        None => Config::default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok(), &mut warnings);
    (c, warnings)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>, warnings: &mut Vec<String>) {
    let port = |key: &str, warnings: &mut Vec<String>| -> Option<u16> {
        let s = var(key)?;
        match s.parse::<u16>() {
            Ok(p) => Some(p),
            Err(_) => {
                warnings.push(format!("{key}={s:?} is not a port; ignored"));
                None
            }
        }
    };
    if let Some(p) = port("WEARLINK_DISCOVERY_PORT", warnings) {
        c.discovery_port = p;
    }
    if let Some(p) = port("WEARLINK_TRANSPORT_PORT", warnings) {
        c.transport_port = p;
    }
    if let Some(name) = var("WEARLINK_DISPLAY_NAME") {
        c.display_name = name;
    }
    if let Some(filter) = var("WEARLINK_LOG") {
        c.log_filter = filter;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/wearlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/wearlink/config.toml"));
    out
}

fn load_file() -> Option<(PathBuf, Result<Config, String>)> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let parsed = parse_file(&path);
    Some((path, parsed))
}

fn parse_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    toml::from_str::<Config>(&s).map_err(|e| e.to_string())
}

/// Emit load warnings once logging is initialized.
pub fn report(warnings: &[String]) {
    for w in warnings {
        warn!("{w}");
    }
}
