use crate::grammar::INERT_API_KEY;
use crate::writer;
use crate::AskError;
use dirs::home_dir;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const API_KEY_ENV: &str = "ASK_API_KEY";

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
    pub request_timeout_sec: u64,
    /// Present until activation splices it out.
    pub activation: Option<ActivationSection>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationSection {
    pub key_url: String,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            api_key: INERT_API_KEY.to_string(),
            model: "gemini-2.5-pro".to_string(),
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            request_timeout_sec: 60,
            activation: None,
        }
    }
}

impl Default for ActivationSection {
    fn default() -> Self {
        Self {
            key_url: "https://aistudio.google.com/app/apikey".to_string(),
            prompt: "Enter your Google AI API key".to_string(),
        }
    }
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("ASK_CONFIG") {
        return PathBuf::from(path);
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("ASK_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("ask");
    base
}

fn ensure_parent(path: &Path) -> Result<(), AskError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Writes the default template when no config exists. Returns whether a file
/// was created.
pub fn init_config(path: &Path) -> Result<bool, AskError> {
    if path.exists() {
        return Ok(false);
    }
    ensure_parent(path)?;
    writer::write_atomic(path, DEFAULT_CONFIG_YAML)?;
    Ok(true)
}

pub fn read_config_from_str(content: &str) -> Result<Config, AskError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Rejects rewritten config text that a later run could not load.
pub fn check_activated(content: &str) -> Result<(), String> {
    read_config_from_str(content)
        .map(|_| ())
        .map_err(|err| err.to_string())
}

pub fn read_config(path: &Path) -> Result<Config, AskError> {
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content).map_err(|err| {
        AskError::Config(format!(
            "config is invalid. Please edit {} and try again. ({})",
            path.display(),
            err
        ))
    })
}

fn validate_config(cfg: &Config) -> Result<(), AskError> {
    if cfg.version != 1 {
        return Err(AskError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    if cfg.model.trim().is_empty() {
        return Err(AskError::Config("model must be non-empty".to_string()));
    }
    if cfg.request_timeout_sec == 0 {
        return Err(AskError::Config(
            "request_timeout_sec must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// API key from the environment, if set and non-blank.
pub fn env_api_key() -> Option<String> {
    env::var(API_KEY_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
