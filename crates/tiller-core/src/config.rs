use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_RUNTIME_HOST: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Ceiling for a single chat request, streaming included.
pub const CHAT_DEADLINE_SECS: u64 = 300;
/// Grace window for terminal persistence after a client disconnect.
pub const PERSIST_GRACE_SECS: u64 = 15;

/// Top-level config (tiller.toml + TILLER_* env overrides).
///
/// Env keys use `__` as the section separator so leaf names may contain
/// underscores: `TILLER_SERVER__PORT`, `TILLER_DATABASE__PATH`,
/// `TILLER_RUNTIME__EMBEDDING_MODEL`, `TILLER_LIMITS__MAX_CONCURRENT_CHATS`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TillerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub host: String,
    /// Deployment environment label: "development" | "production".
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_bind(),
            env: default_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base URL of the LLM runtime (Ollama-compatible API).
    #[serde(default = "default_runtime_host")]
    pub host: String,
    /// Per-request HTTP timeout in seconds for non-streaming calls.
    #[serde(default = "default_runtime_timeout")]
    pub timeout_secs: u64,
    /// Model used for all embeddings. Its vector length becomes the schema
    /// dimension on first boot and is enforced on every boot after.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: default_runtime_host(),
            timeout_secs: default_runtime_timeout(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Chat requests admitted concurrently; further requests queue.
    #[serde(default = "default_max_chats")]
    pub max_concurrent_chats: usize,
    #[serde(default = "default_http_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub write_timeout_secs: u64,
    /// Installable-models cache lifetime.
    #[serde(default = "default_models_ttl")]
    pub available_models_ttl_hours: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chats: default_max_chats(),
            read_timeout_secs: default_http_timeout(),
            write_timeout_secs: default_http_timeout(),
            available_models_ttl_hours: default_models_ttl(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_env() -> String {
    "development".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tiller/tiller.db", home)
}
fn default_runtime_host() -> String {
    DEFAULT_RUNTIME_HOST.to_string()
}
fn default_runtime_timeout() -> u64 {
    120
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_chats() -> usize {
    8
}
fn default_http_timeout() -> u64 {
    30
}
fn default_models_ttl() -> u64 {
    24
}

impl TillerConfig {
    /// Load config from a TOML file with TILLER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ./tiller.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("tiller.toml");

        let config: TillerConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TILLER_").split("__"))
            .extract()
            .map_err(|e| crate::error::Error::Validation(format!("config: {e}")))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TillerConfig::default();
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.runtime.host, DEFAULT_RUNTIME_HOST);
        assert_eq!(cfg.runtime.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(cfg.limits.available_models_ttl_hours, 24);
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn env_override_wins() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TILLER_SERVER__PORT", "9999");
            jail.set_env("TILLER_RUNTIME__EMBEDDING_MODEL", "all-minilm");
            let cfg = TillerConfig::load(None).expect("load");
            assert_eq!(cfg.server.port, 9999);
            assert_eq!(cfg.runtime.embedding_model, "all-minilm");
            Ok(())
        });
    }
}
