//! Configuration loading: TOML file plus deployment environment variables.

use nerv_types::config::{NervConfig, LOOPBACK_IPS};
use nerv_types::error::{NervError, NervResult};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Get the default config file location (`~/.nerv/config.toml`).
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".nerv")
        .join("config.toml")
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file.
    File(PathBuf),
    /// No file at this path; built-in defaults were used.
    Defaults(PathBuf),
}

impl ConfigSource {
    /// Report the source. Loading runs before the subscriber exists, so the
    /// binary calls this once tracing is up.
    pub fn log(&self) {
        match self {
            Self::File(path) => info!(path = %path.display(), "Loaded config file"),
            Self::Defaults(path) => {
                info!(path = %path.display(), "Config file not found, using defaults")
            }
        }
    }
}

/// Load configuration from `path` (or the default location) and apply the
/// process environment on top.
///
/// A missing file yields defaults. A file that exists but cannot be read or
/// parsed is an error, and so is a configuration that fails validation.
pub fn load_config(path: Option<&Path>) -> NervResult<(NervConfig, ConfigSource)> {
    load_config_with(path, &EnvOverrides::from_env())
}

fn load_config_with(
    path: Option<&Path>,
    env: &EnvOverrides,
) -> NervResult<(NervConfig, ConfigSource)> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let (mut config, source) = read_config_file(&config_path)?;
    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok((config, source))
}

fn read_config_file(path: &Path) -> NervResult<(NervConfig, ConfigSource)> {
    if !path.exists() {
        return Ok((NervConfig::default(), ConfigSource::Defaults(path.to_path_buf())));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| {
        NervError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = toml::from_str::<NervConfig>(&contents).map_err(|e| {
        NervError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok((config, ConfigSource::File(path.to_path_buf())))
}

/// Deployment overrides read from the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    /// `NERV_IPS`: comma-separated IPs added to the allow-list.
    pub ips: Option<String>,
    /// `NERV_COMPUTER_LABELS`: comma-separated labels replacing the known list.
    pub computer_labels: Option<String>,
    /// `PORT`: listener port.
    pub port: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            ips: std::env::var("NERV_IPS").ok(),
            computer_labels: std::env::var("NERV_COMPUTER_LABELS").ok(),
            port: std::env::var("PORT").ok(),
        }
    }
}

/// Apply environment overrides and guarantee the loopback addresses are
/// always allowed.
pub fn apply_env_overrides(config: &mut NervConfig, env: &EnvOverrides) -> NervResult<()> {
    if let Some(ips) = &env.ips {
        config
            .ws
            .allowed_ips
            .extend(split_list(ips).map(|ip| ip.to_lowercase()));
    }

    if let Some(labels) = &env.computer_labels {
        let labels: Vec<String> = split_list(labels).map(str::to_owned).collect();
        if !labels.is_empty() {
            config.ws.known_labels = labels;
        }
    }

    if let Some(port) = env.port.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let port: u16 = port
            .parse()
            .map_err(|_| NervError::Config(format!("invalid PORT '{port}'")))?;
        config.server.listen_addr = with_port(&config.server.listen_addr, port);
    }

    for ip in LOOPBACK_IPS {
        if !config.ws.allowed_ips.iter().any(|a| a == ip) {
            config.ws.allowed_ips.push(ip.to_string());
        }
    }
    Ok(())
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn with_port(listen_addr: &str, port: u16) -> String {
    if let Ok(mut addr) = listen_addr.parse::<SocketAddr>() {
        addr.set_port(port);
        return addr.to_string();
    }
    match listen_addr.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{listen_addr}:{port}"),
    }
}
