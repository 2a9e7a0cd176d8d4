pub mod schema;

pub use schema::{AppConfig, ProviderConfig};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "crawlab-mcp.toml";

/// Default config file location (`<config dir>/crawlab-mcp/crawlab-mcp.toml`).
pub fn default_config_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join("crawlab-mcp").join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig =
            toml::from_str(&contents).context("Failed to parse crawlab-mcp config (TOML)")?;
        Ok(config)
    } else {
        debug!("No config at {}, using defaults", path.display());
        Ok(AppConfig::default())
    }
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}

/// Overlay environment variables on file values.
///
/// `lookup` is usually `|k| std::env::var(k).ok()`; empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("CRAWLAB_API_BASE_URL") {
        config.api_base_url = v;
    }
    if let Some(v) = get("CRAWLAB_API_TOKEN") {
        config.api_token = v;
    }
    if let Some(v) = get("CRAWLAB_OPENAPI_SPEC") {
        config.openapi_spec = v;
    }
    if let Some(v) = get("LLM_PROVIDER") {
        config.llm.provider = v;
    }
    if let Some(v) = get("LLM_API_KEY") {
        config.llm.api_key = v;
    }
    if let Some(v) = get("LLM_BASE_URL") {
        config.llm.base_url = v;
    }
    if let Some(v) = get("LLM_MODEL") {
        config.llm.model = v;
    }
    if let Some(v) = get("LLM_API_VERSION") {
        config.llm.api_version = v;
    }
}
