//! Daemon configuration, read once from the environment at startup

use anyhow::{Context, Result};
use recall_api_rpc::RpcServerConfig;
use recall_infra_inference::OllamaConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.recall/jobs.db";
const DEFAULT_LOG_FILTER: &str = "recall=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Rolling file output when set
    pub dir: Option<PathBuf>,
    pub default_filter: String,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub rpc: RpcServerConfig,
    pub log: LogConfig,
    pub ready_timeout: Duration,
    pub stale_after: Duration,
    pub safety_poll_interval: Duration,
    pub ollama: OllamaConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = expand(&get("RECALL_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()));

        let format = match get("RECALL_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("RECALL_LOG_FORMAT must be json or pretty, got {}", other),
        };

        let defaults = RpcServerConfig::default();
        let rpc = RpcServerConfig {
            port: parse_or(&get, "RECALL_RPC_PORT", defaults.port)?,
            rate_limit_burst: parse_or(&get, "RECALL_RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_rate: parse_or(&get, "RECALL_RATE_LIMIT_RATE", defaults.rate_limit_rate)?,
            ..defaults
        };

        let mut ollama = OllamaConfig::default();
        if let Some(base) = get("OLLAMA_BASE") {
            ollama = ollama.with_base_url(base);
        }
        if let Some(model) = get("OLLAMA_GEN_MODEL") {
            ollama = ollama.with_gen_model(model);
        }
        if let Some(model) = get("OLLAMA_EMBED_MODEL") {
            ollama = ollama.with_embed_model(model);
        }
        let dimension = parse_or(&get, "OLLAMA_EMBED_DIM", ollama.dimension)?;
        ollama = ollama.with_dimension(dimension);

        Ok(Self {
            db_path,
            rpc,
            log: LogConfig {
                format,
                dir: get("RECALL_LOG_DIR").map(|d| expand(&d)),
                default_filter: DEFAULT_LOG_FILTER.to_string(),
            },
            ready_timeout: Duration::from_secs(parse_or(&get, "RECALL_READY_TIMEOUT_SECS", 30)?),
            stale_after: Duration::from_secs(60 * parse_or(&get, "RECALL_STALE_AFTER_MINS", 30)?),
            safety_poll_interval: Duration::from_secs(parse_or(&get, "RECALL_SAFETY_POLL_SECS", 30)?),
            ollama,
        })
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        None => Ok(default),
    }
}
