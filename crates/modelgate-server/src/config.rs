//! Server configuration
//!
//! Settings are layered, later layers winning:
//! 1. built-in defaults
//! 2. an optional YAML file
//! 3. `MODELGATE__*` environment variables (`__` separates nested keys,
//!    e.g. `MODELGATE__LOADER__REGISTRY__TRACKING_URI`)
//! 4. command-line flags, which also read the conventional MLflow and AWS
//!    environment variables

use clap::Args;
use config::{Config, Environment, File, FileFormat, Map};
use modelgate_core::{Error, ModelReference, Result};
use modelgate_loader::LoaderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given, if it exists
pub const DEFAULT_CONFIG_FILE: &str = "modelgate.yaml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "MODELGATE";

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Model served when a request names none
    #[serde(default)]
    pub model: ModelConfig,

    /// Resolve the default model before accepting requests
    #[serde(default = "default_true")]
    pub preload: bool,

    /// Registry, storage and scratch settings
    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            model: ModelConfig::default(),
            preload: true,
            loader: LoaderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Default model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registered model name, also used by `/predict/{version}`
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Registered version served by default
    #[serde(default = "default_model_version")]
    pub version: String,

    /// Explicit reference overriding `name`/`version` for the default model
    #[serde(default)]
    pub uri: Option<String>,
}

fn default_model_name() -> String {
    "argo-dag-demo".to_string()
}

fn default_model_version() -> String {
    "3".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            version: default_model_version(),
            uri: None,
        }
    }
}

impl ModelConfig {
    /// Reference answering requests that name no model
    pub fn default_reference(&self) -> Result<ModelReference> {
        match &self.uri {
            Some(uri) => ModelReference::parse(uri)
                .map_err(|e| Error::config(format!("model.uri: {}", e))),
            None => Ok(ModelReference::registry(self.name.as_str(), self.version.as_str())),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}

/// Configuration flags shared by the server and the smoke CLI
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tracking server URL
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    pub tracking_uri: Option<String>,

    /// Object storage endpoint for s3:// references
    #[arg(long, env = "MLFLOW_S3_ENDPOINT_URL")]
    pub s3_endpoint_url: Option<String>,

    /// Object storage access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    /// Object storage secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    /// Default model reference
    #[arg(long, env = "MODEL_URI")]
    pub model_uri: Option<String>,

    /// Directory for fetched artifacts
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from file, environment and CLI overrides
    pub fn load(args: &ConfigArgs) -> Result<Self> {
        Self::build(args, None)
    }

    /// Load with an explicit environment instead of the process one
    pub fn build(args: &ConfigArgs, env: Option<Map<String, String>>) -> Result<Self> {
        let (path, required) = match &args.config {
            Some(path) => (path.as_path(), true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        let layered = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .map_err(|e| Error::config(e.to_string()))?;

        let mut config: ServerConfig = layered
            .try_deserialize()
            .map_err(|e| Error::config(e.to_string()))?;

        config.apply_overrides(args);
        config.model.default_reference()?;
        Ok(config)
    }

    /// Apply CLI overrides
    fn apply_overrides(&mut self, args: &ConfigArgs) {
        if let Some(uri) = &args.tracking_uri {
            self.loader.registry.tracking_uri = uri.clone();
        }

        if let Some(endpoint) = &args.s3_endpoint_url {
            self.loader.storage.endpoint_url = Some(endpoint.clone());
        }

        if let Some(key) = &args.aws_access_key_id {
            self.loader.storage.access_key_id = Some(key.clone());
        }

        if let Some(secret) = &args.aws_secret_access_key {
            self.loader.storage.secret_access_key = Some(secret.clone());
        }

        if let Some(uri) = &args.model_uri {
            self.model.uri = Some(uri.clone());
        }

        if let Some(dir) = &args.scratch_dir {
            self.loader.scratch_dir = Some(dir.clone());
        }
    }
}
