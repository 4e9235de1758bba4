use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file read when `--config-path` is not given. Optional.
const DEFAULT_CONFIG_FILE: &str = "server_relay.conf";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9003;
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {0} does not exist")]
    Missing(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid listen host '{host}': {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("TLS needs both a certificate and a private key")]
    IncompleteTls,

    #[error("Could not determine home directory for the Let's Encrypt certificates")]
    NoHomeDir,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "Collaborative document relay over WebSockets", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "RELAY_HOST", help = "Interface to listen on.")]
    pub host: Option<String>,

    #[arg(long, env = "RELAY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[arg(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error, off).")]
    pub log_level: Option<String>,

    #[arg(long, env = "RELAY_STATIC_DIR", help = "Directory of static files served next to the relay.")]
    pub static_dir: Option<PathBuf>,

    #[arg(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[arg(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,

    #[arg(long, env = "RELAY_LETSENCRYPT", help = "Use ~/.letsencrypt/{fullchain,privkey}.pem for any TLS path not given.")]
    pub letsencrypt: Option<bool>,
}

/// Certificate and key for the TLS listener.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub addr: SocketAddr,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub static_dir: Option<PathBuf>,
    pub tls: Option<TlsPaths>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            static_dir: other.static_dir.or(self.static_dir),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
            letsencrypt: other.letsencrypt.or(self.letsencrypt),
        }
    }

    // Fills every gap left by file, environment and CLI with the built-in defaults.
    fn into_settings(self) -> Result<Settings, ConfigError> {
        let host = self.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let ip: IpAddr = host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { host: host.clone(), source })?;

        let (mut cert, mut key) = (self.tls_cert_path, self.tls_key_path);
        if self.letsencrypt.unwrap_or(false) {
            let letsencrypt_dir = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(".letsencrypt");
            cert = cert.or_else(|| Some(letsencrypt_dir.join("fullchain.pem")));
            key = key.or_else(|| Some(letsencrypt_dir.join("privkey.pem")));
        }
        let tls = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        Ok(Settings {
            addr: SocketAddr::new(ip, self.port.unwrap_or(DEFAULT_PORT)),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            static_dir: self.static_dir,
            tls,
        })
    }
}

/// Loads settings from defaults, the config file, then environment and CLI.
pub fn load_config() -> Result<Settings, ConfigError> {
    resolve(Config::parse())
}

/// Resolves `cli` (already holding environment values) against the config
/// file and the defaults.
///
/// Precedence, lowest first: built-in defaults, JSON config file, `cli`.
/// A missing default config file is fine; a missing explicit one is not.
pub fn resolve(cli: Config) -> Result<Settings, ConfigError> {
    let explicit_path = cli.config_path.clone();
    let config_file_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::default();

    if config_file_path.exists() {
        current_config = current_config.merge(read_config_file(&config_file_path)?);
    } else if explicit_path.is_some() {
        return Err(ConfigError::Missing(config_file_path));
    }

    current_config.merge(cli).into_settings()
}

fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str::<Config>(&config_str).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
