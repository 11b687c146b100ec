use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};

use crate::inference::BackendKind;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub api_prefix: String,
    pub bind_addr: String,
    pub debug: bool,
    pub cors_origins: Vec<String>,
    pub log_level: String,

    pub backend: BackendKind,
    pub model_name: String,
    pub model_revision: String,
    pub model_path: PathBuf,
    pub model_device: String,
    pub max_tokens: usize,
    pub max_new_tokens: usize,
    pub inference_timeout: Option<Duration>,

    pub llama_gpu_layers: Option<i32>,
    pub llama_threads: Option<i32>,
    pub llama_pool_size: usize,

    pub cache_max_entries: usize,
    pub max_text_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Customer Review Analysis API".into(),
            app_version: env!("CARGO_PKG_VERSION").into(),
            api_prefix: "/api/v1".into(),
            bind_addr: "0.0.0.0:8000".into(),
            debug: false,
            cors_origins: vec!["*".into()],
            log_level: "info".into(),

            backend: BackendKind::Seq2Seq,
            model_name: "google/flan-t5-small".into(),
            model_revision: "main".into(),
            model_path: PathBuf::from("models/model.gguf"),
            model_device: "cpu".into(),
            max_tokens: 512,
            max_new_tokens: 10,
            inference_timeout: Some(Duration::from_millis(10_000)),

            llama_gpu_layers: None,
            llama_threads: None,
            llama_pool_size: 2,

            cache_max_entries: 0,
            max_text_length: 5000,
        }
    }
}

impl Settings {
    /// Reads the process environment (plus `.env`, if the caller loaded it).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Settings::default();

        let backend = match get("MODEL_BACKEND") {
            Some(raw) => raw
                .parse::<BackendKind>()
                .map_err(|err| anyhow!(err))
                .context("invalid MODEL_BACKEND")?,
            None => defaults.backend,
        };

        let timeout_ms: u64 = parse_or(&get, "INFERENCE_TIMEOUT_MS", 10_000)?;

        Ok(Self {
            app_name: get("APP_NAME").unwrap_or(defaults.app_name),
            app_version: get("APP_VERSION").unwrap_or(defaults.app_version),
            api_prefix: normalize_prefix(get("API_PREFIX").unwrap_or(defaults.api_prefix)),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            debug: parse_bool(&get, "DEBUG", defaults.debug)?,
            cors_origins: get("CORS_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.cors_origins),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),

            backend,
            model_name: get("MODEL_NAME").unwrap_or(defaults.model_name),
            model_revision: get("MODEL_REVISION").unwrap_or(defaults.model_revision),
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            model_device: get("MODEL_DEVICE").unwrap_or(defaults.model_device),
            max_tokens: parse_or(&get, "MAX_TOKENS", defaults.max_tokens)?,
            max_new_tokens: parse_or(&get, "MAX_NEW_TOKENS", defaults.max_new_tokens)?,
            inference_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),

            llama_gpu_layers: parse_opt(&get, "LLAMA_GPU_LAYERS")?,
            llama_threads: parse_opt(&get, "LLAMA_THREADS")?,
            llama_pool_size: parse_or(&get, "LLAMA_POOL_SIZE", defaults.llama_pool_size)?,

            cache_max_entries: parse_or(&get, "CACHE_MAX_ENTRIES", defaults.cache_max_entries)?,
            max_text_length: parse_or(&get, "MAX_TEXT_LENGTH", defaults.max_text_length)?,
        })
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &str {
        if self.debug && self.log_level == "info" {
            "debug"
        } else {
            &self.log_level
        }
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("invalid {key} value '{raw}'"))
        })
        .transpose()
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key).map(|raw| raw.to_ascii_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {key} value '{raw}'")),
        },
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
