//! The immutable per-run configuration and its builder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ConfigError;

/// Default step budget per run.
pub const DEFAULT_MAX_STEPS: u32 = 25;

/// Default total run timeout (5 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Default cap on tool output appended to the transcript (100 KiB).
pub const DEFAULT_MAX_TOOL_OUTPUT_SIZE: usize = 100 * 1024;

/// How a tool-graph router may narrow the tool list offered to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGraphPolicy {
    /// Restrictions are hints; an empty whitelist falls back to all tools
    #[default]
    Advisory,
    /// Restrictions are binding
    Strict,
}

/// Parameters of a single agent run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    max_steps: u32,
    timeout_ms: u64,
    max_tool_output_size: usize,
    enabled_tools: BTreeSet<String>,
    disabled_tools: BTreeSet<String>,
    streaming_enabled: bool,
    system_prompt_addition: Option<String>,
    profile_name: Option<String>,
    tool_graph_enabled: bool,
    tool_graph_policy: ToolGraphPolicy,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Copy this configuration into a new builder.
    pub fn to_builder(&self) -> RunConfigBuilder {
        RunConfigBuilder {
            max_steps: self.max_steps,
            timeout_ms: self.timeout_ms,
            max_tool_output_size: self.max_tool_output_size,
            enabled_tools: self.enabled_tools.clone(),
            disabled_tools: self.disabled_tools.clone(),
            streaming_enabled: self.streaming_enabled,
            system_prompt_addition: self.system_prompt_addition.clone(),
            profile_name: self.profile_name.clone(),
            tool_graph_enabled: self.tool_graph_enabled,
            tool_graph_policy: self.tool_graph_policy,
        }
    }

    /// Maximum number of model round-trips.
    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Total run timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Tool output beyond this many bytes is truncated.
    pub fn max_tool_output_size(&self) -> usize {
        self.max_tool_output_size
    }

    /// Explicitly enabled tools. Empty means "all tools".
    pub fn enabled_tools(&self) -> &BTreeSet<String> {
        &self.enabled_tools
    }

    pub fn disabled_tools(&self) -> &BTreeSet<String> {
        &self.disabled_tools
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled
    }

    /// Text appended to the base system prompt.
    pub fn system_prompt_addition(&self) -> Option<&str> {
        self.system_prompt_addition.as_deref()
    }

    /// Agent profile name (build, plan, explore, ...).
    pub fn profile_name(&self) -> Option<&str> {
        self.profile_name.as_deref()
    }

    pub fn tool_graph_enabled(&self) -> bool {
        self.tool_graph_enabled
    }

    pub fn tool_graph_policy(&self) -> ToolGraphPolicy {
        self.tool_graph_policy
    }

    /// The single authorization predicate for tool eligibility.
    ///
    /// `name ∉ disabled ∧ (enabled = ∅ ∨ name ∈ enabled)`
    pub fn is_tool_allowed(&self, name: &str) -> bool {
        if self.disabled_tools.contains(name) {
            return false;
        }
        self.enabled_tools.is_empty() || self.enabled_tools.contains(name)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_tool_output_size: DEFAULT_MAX_TOOL_OUTPUT_SIZE,
            enabled_tools: BTreeSet::new(),
            disabled_tools: BTreeSet::new(),
            streaming_enabled: true,
            system_prompt_addition: None,
            profile_name: None,
            tool_graph_enabled: true,
            tool_graph_policy: ToolGraphPolicy::Advisory,
        }
    }
}

impl std::fmt::Display for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RunConfig{{max_steps={}, timeout_ms={}, streaming={}, profile={}, tool_graph={}, tool_graph_policy={:?}}}",
            self.max_steps,
            self.timeout_ms,
            self.streaming_enabled,
            self.profile_name.as_deref().unwrap_or("default"),
            self.tool_graph_enabled,
            self.tool_graph_policy,
        )
    }
}

/// Builder for [`RunConfig`]. Numeric limits are checked in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    max_steps: u32,
    timeout_ms: u64,
    max_tool_output_size: usize,
    enabled_tools: BTreeSet<String>,
    disabled_tools: BTreeSet<String>,
    streaming_enabled: bool,
    system_prompt_addition: Option<String>,
    profile_name: Option<String>,
    tool_graph_enabled: bool,
    tool_graph_policy: ToolGraphPolicy,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        RunConfig::default().to_builder()
    }
}

impl RunConfigBuilder {
    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn max_tool_output_size(mut self, bytes: usize) -> Self {
        self.max_tool_output_size = bytes;
        self
    }

    /// Add one tool to the allow list. Empty names are ignored.
    pub fn enable_tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.enabled_tools.insert(name);
        }
        self
    }

    /// Add one tool to the deny list. Empty names are ignored.
    pub fn disable_tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.disabled_tools.insert(name);
        }
        self
    }

    /// Replace the allow list.
    pub fn enabled_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_tools = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the deny list.
    pub fn disabled_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_tools = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn streaming_enabled(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        self
    }

    pub fn system_prompt_addition(mut self, addition: impl Into<String>) -> Self {
        self.system_prompt_addition = Some(addition.into());
        self
    }

    pub fn profile_name(mut self, profile: impl Into<String>) -> Self {
        self.profile_name = Some(profile.into());
        self
    }

    pub fn tool_graph_enabled(mut self, enabled: bool) -> Self {
        self.tool_graph_enabled = enabled;
        self
    }

    pub fn tool_graph_policy(mut self, policy: ToolGraphPolicy) -> Self {
        self.tool_graph_policy = policy;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "max_steps must be positive: 0".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_ms must be positive: 0".into(),
            ));
        }
        if self.max_tool_output_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_tool_output_size must be positive: 0".into(),
            ));
        }

        Ok(RunConfig {
            max_steps: self.max_steps,
            timeout_ms: self.timeout_ms,
            max_tool_output_size: self.max_tool_output_size,
            enabled_tools: self.enabled_tools,
            disabled_tools: self.disabled_tools,
            streaming_enabled: self.streaming_enabled,
            system_prompt_addition: self.system_prompt_addition,
            profile_name: self.profile_name,
            tool_graph_enabled: self.tool_graph_enabled,
            tool_graph_policy: self.tool_graph_policy,
        })
    }
}
