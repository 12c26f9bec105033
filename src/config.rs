//! Processing configuration stored in ~/.advisoros/config.json
//!
//! The manager owns a live copy and snapshots it per call; this module owns
//! the shape, serde defaults, validation, partial updates, and file I/O.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::types::AnalysisMode;

/// Active analysis settings. Every field has a serde default so a partial
/// config file (or an empty one) loads cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    #[serde(default = "default_mode")]
    pub mode: AnalysisMode,
    /// Model variant passed through to the insight service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_variant: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry once against the rule-based back end when the selected one fails.
    #[serde(default = "default_fallback")]
    pub fallback_to_rule_based: bool,
    /// Base URL of the insight service. Required for remote-llm mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// Bearer token for the insight service. Required for remote-llm mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_mode() -> AnalysisMode {
    AnalysisMode::RuleBased
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_fallback() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    1_024
}

fn default_temperature() -> f64 {
    0.2
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            model_variant: None,
            timeout_ms: default_timeout_ms(),
            fallback_to_rule_based: default_fallback(),
            service_url: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl ProcessingConfig {
    /// Validate the settings the given mode will actually use. The manager
    /// calls this with the effective mode of each dispatch, which may be an
    /// override rather than `self.mode`.
    pub fn validate_for(&self, mode: AnalysisMode) -> Result<(), AnalysisError> {
        if self.timeout_ms == 0 {
            return Err(AnalysisError::Configuration(
                "timeoutMs must be at least 1".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(AnalysisError::Configuration(
                "maxTokens must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AnalysisError::Configuration(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if mode == AnalysisMode::RemoteLlm {
            let url = match self.service_url.as_deref() {
                Some(u) if !u.trim().is_empty() => u,
                _ => {
                    return Err(AnalysisError::Configuration(
                        "serviceUrl is required for remote-llm mode".to_string(),
                    ))
                }
            };
            let parsed = url::Url::parse(url).map_err(|e| {
                AnalysisError::Configuration(format!("serviceUrl is not a valid URL: {}", e))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(AnalysisError::Configuration(format!(
                    "serviceUrl must use http or https, got {}",
                    parsed.scheme()
                )));
            }
            match self.api_key.as_deref() {
                Some(k) if !k.trim().is_empty() => {}
                _ => {
                    return Err(AnalysisError::Configuration(
                        "apiKey is required for remote-llm mode".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.validate_for(self.mode)
    }

    /// Copy with `update` merged field-wise on top.
    pub fn merged(&self, update: &ConfigUpdate) -> ProcessingConfig {
        let mut next = self.clone();
        if let Some(mode) = update.mode {
            next.mode = mode;
        }
        if let Some(ref variant) = update.model_variant {
            next.model_variant = Some(variant.clone());
        }
        if let Some(timeout_ms) = update.timeout_ms {
            next.timeout_ms = timeout_ms;
        }
        if let Some(fallback) = update.fallback_to_rule_based {
            next.fallback_to_rule_based = fallback;
        }
        if let Some(ref service_url) = update.service_url {
            next.service_url = Some(service_url.clone());
        }
        if let Some(ref api_key) = update.api_key {
            next.api_key = Some(api_key.clone());
        }
        if let Some(max_tokens) = update.max_tokens {
            next.max_tokens = max_tokens;
        }
        if let Some(temperature) = update.temperature {
            next.temperature = temperature;
        }
        next
    }

    /// Load configuration from ~/.advisoros/config.json, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<ProcessingConfig, String> {
        let path = config_path()?;
        if !path.exists() {
            log::debug!("Config: no file at {}, using defaults", path.display());
            return Ok(ProcessingConfig::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<ProcessingConfig, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
        let config: ProcessingConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create config dir: {}", e))?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }
}

/// Partial update applied onto the live config. Absent fields leave the
/// current value in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default)]
    pub mode: Option<AnalysisMode>,
    #[serde(default)]
    pub model_variant: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fallback_to_rule_based: Option<bool>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".advisoros").join("config.json"))
}
