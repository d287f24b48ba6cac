use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub uploads: UploadConfig,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_worker_threads() -> usize {
    2
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Validatable for DatabaseConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.url.starts_with("sqlite:") {
            return Err(format!(
                "Unsupported database url {:?}, expected a `sqlite:` url",
                self.url
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone)]
pub struct SessionConfig {
    pub secret: String,
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl SessionConfig {
    pub fn get_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// Keeps the secret out of the startup log line.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl Validatable for SessionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(format!(
                "Session secret must be at least {} bytes long",
                MIN_SECRET_LEN
            ));
        }
        if self.ttl_secs == 0 {
            return Err("session.ttl_secs must be at least 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Load once at startup and keep the sessions resident.
    Eager,
    /// Load on the first classification and keep the sessions resident.
    Lazy,
    /// Load, run and drop a session for every classification.
    PerRequest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    #[serde(default = "default_lite_file")]
    pub lite_file: String,
    #[serde(default = "default_full_file")]
    pub full_file: String,
    #[serde(default = "default_load_policy")]
    pub load_policy: LoadPolicy,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_lite_file() -> String {
    "model_traffic_signs.ort".into()
}

fn default_full_file() -> String {
    "model_traffic_signs.onnx".into()
}

fn default_load_policy() -> LoadPolicy {
    LoadPolicy::Eager
}

fn default_model_instances() -> usize {
    1
}

impl ModelConfig {
    pub fn get_lite_path(&self) -> PathBuf {
        self.model_dir.join(&self.lite_file)
    }

    pub fn get_full_path(&self) -> PathBuf {
        self.model_dir.join(&self.full_file)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.num_instances == 0 {
            return Err("model.num_instances must be at least 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.database.validate()?;
        self.session.validate()?;
        self.model.validate()?;
        Ok(())
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("current directory: {}", e)))?;
    load_configuration(&base_path.join("configuration"), |key| {
        std::env::var(key).ok()
    })
}

/// Layers `base.yaml`, `<environment>.yaml`, `APP_*` variables and the
/// `PORT`/`DATABASE_URL`/`SECRET_KEY` overrides looked up through `var`.
pub fn load_configuration<F>(
    configuration_directory: &Path,
    var: F,
) -> Result<Config, config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let environment: Environment = var("APP_ENVIRONMENT")
        .unwrap_or_else(|| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let port = var("PORT")
        .map(|p| p.parse::<u16>().map(i64::from))
        .transpose()
        .map_err(|e| config::ConfigError::Message(format!("invalid PORT: {}", e)))?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("server.port", port)?
        .set_override_option("database.url", var("DATABASE_URL"))?
        .set_override_option("session.secret", var("SECRET_KEY"))?
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}
