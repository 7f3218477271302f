//! File and environment backed agent settings.
//!
//! Settings live in the `[agent]` section of a TOML file:
//!
//! ```toml
//! [agent]
//! max_steps = 10
//! timeout_ms = 60000
//! disabled_tools = ["shell"]
//! profile = "explore"
//! autonomy = "supervised"
//! ```
//!
//! Environment variables override file values:
//! - `STEPWISE_MAX_STEPS`
//! - `STEPWISE_TIMEOUT_MS`
//! - `STEPWISE_STREAMING`
//! - `STEPWISE_PROFILE`

use serde::{Deserialize, Serialize};
use std::path::Path;

use stepwise_core::AutonomyLevel;

use crate::ConfigError;
use crate::run::{
    DEFAULT_MAX_STEPS, DEFAULT_MAX_TOOL_OUTPUT_SIZE, DEFAULT_TIMEOUT_MS, RunConfig,
    ToolGraphPolicy,
};

/// The `[agent]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_tool_output_size")]
    pub max_tool_output_size: usize,

    #[serde(default)]
    pub enabled_tools: Vec<String>,

    #[serde(default)]
    pub disabled_tools: Vec<String>,

    #[serde(default = "default_true")]
    pub streaming: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_addition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default = "default_true")]
    pub tool_graph_enabled: bool,

    #[serde(default)]
    pub tool_graph_policy: ToolGraphPolicy,

    /// Policy for the built-in confirmation listener
    #[serde(default)]
    pub autonomy: AutonomyLevel,

    /// Emit a per-run telemetry summary
    #[serde(default = "default_true")]
    pub prompt_telemetry: bool,
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_max_tool_output_size() -> usize {
    DEFAULT_MAX_TOOL_OUTPUT_SIZE
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            timeout_ms: default_timeout_ms(),
            max_tool_output_size: default_max_tool_output_size(),
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
            streaming: true,
            system_prompt_addition: None,
            profile: None,
            tool_graph_enabled: true,
            tool_graph_policy: ToolGraphPolicy::default(),
            autonomy: AutonomyLevel::default(),
            prompt_telemetry: true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    agent: AgentSettings,
}

impl AgentSettings {
    /// Load settings from a TOML file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let file: SettingsFile = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        file.agent.validate()?;
        Ok(file.agent)
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?;
        file.agent.validate()?;
        Ok(file.agent)
    }

    /// Apply `STEPWISE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values are
    /// logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("STEPWISE_MAX_STEPS") {
            match raw.trim().parse::<u32>() {
                Ok(value) => self.max_steps = value,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid STEPWISE_MAX_STEPS"),
            }
        }

        if let Some(raw) = lookup("STEPWISE_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(value) => self.timeout_ms = value,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid STEPWISE_TIMEOUT_MS"),
            }
        }

        if let Some(raw) = lookup("STEPWISE_STREAMING") {
            match parse_bool(&raw) {
                Some(value) => self.streaming = value,
                None => tracing::warn!(value = %raw, "Ignoring invalid STEPWISE_STREAMING"),
            }
        }

        if let Some(raw) = lookup("STEPWISE_PROFILE") {
            let profile = raw.trim();
            if !profile.is_empty() {
                self.profile = Some(profile.to_string());
            }
        }
    }

    /// Build the immutable run configuration.
    pub fn to_run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut builder = RunConfig::builder()
            .max_steps(self.max_steps)
            .timeout_ms(self.timeout_ms)
            .max_tool_output_size(self.max_tool_output_size)
            .enabled_tools(self.enabled_tools.iter().filter(|n| !n.is_empty()).cloned())
            .disabled_tools(self.disabled_tools.iter().filter(|n| !n.is_empty()).cloned())
            .streaming_enabled(self.streaming)
            .tool_graph_enabled(self.tool_graph_enabled)
            .tool_graph_policy(self.tool_graph_policy);

        if let Some(addition) = &self.system_prompt_addition {
            builder = builder.system_prompt_addition(addition.clone());
        }
        if let Some(profile) = &self.profile {
            builder = builder.profile_name(profile.clone());
        }

        builder.build()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&SettingsFile::default()).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.to_run_config().map(|_| ())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
