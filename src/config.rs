//! Application configuration.
//!
//! Values are merged in this order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. YAML file (`config.yaml`, or `-f` / `UPLOAD_STORE_CONFIG`)
//! 3. `UPLOAD_STORE_`-prefixed environment variables (`UPLOAD_STORE_PORT=9000`)
//! 4. CLI overrides (`--host`, `--port`, `--upload-dir`)
//!
//! `username` and `password` have no defaults and must be supplied.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};
use thiserror::Error;

const ENV_PREFIX: &str = "UPLOAD_STORE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line arguments.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Date-partitioned file upload server")]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(
        short = 'f',
        long,
        env = "UPLOAD_STORE_CONFIG",
        default_value = "config.yaml"
    )]
    pub config: String,

    /// Host to bind to (overrides `host`)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides `port`)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are stored (overrides `upload_dir`)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,
}

/// Immutable service configuration, shared with handlers through `AppState`.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for stored uploads.
    pub upload_dir: PathBuf,
    /// Route prefix for downloads and prefix of returned URLs, without
    /// leading or trailing slashes.
    pub access_prefix: String,
    pub username: String,
    pub password: String,
    /// Largest accepted upload request body.
    pub max_upload_bytes: usize,
    /// Deadline for handling a single request.
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            upload_dir: PathBuf::from("./uploads"),
            access_prefix: "files".into(),
            username: String::new(),
            password: String::new(),
            max_upload_bytes: 32 * 1024 * 1024,
            request_timeout_secs: 300,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upload_dir", &self.upload_dir)
            .field("access_prefix", &self.access_prefix)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load, merge and validate configuration.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut cfg: Self = Self::figment(args).extract()?;

        if let Some(host) = &args.host {
            cfg.host = host.clone();
        }
        if let Some(port) = args.port {
            cfg.port = port;
        }
        if let Some(upload_dir) = &args.upload_dir {
            cfg.upload_dir = upload_dir.clone();
        }
        cfg.access_prefix = cfg.access_prefix.trim_matches('/').to_string();

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(ConfigError::Invalid(
                "username and password must both be set".into(),
            ));
        }
        if self.upload_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("upload_dir must not be empty".into()));
        }
        if self.access_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "access_prefix must not be empty".into(),
            ));
        }
        if self
            .access_prefix
            .chars()
            .any(|c| matches!(c, '{' | '}' | '*'))
        {
            return Err(ConfigError::Invalid(format!(
                "access_prefix `{}` contains route metacharacters",
                self.access_prefix
            )));
        }
        if self.access_prefix == "upload" {
            return Err(ConfigError::Invalid(
                "access_prefix `upload` collides with the upload route".into(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_upload_bytes must be greater than zero".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
