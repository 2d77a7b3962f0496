//! Engine configuration loading.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tree::ServiceTiming;
use crate::types::ExecutionMode;

/// Per-component settings, usually loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mode used by `start_logic`
    pub execution_mode: ExecutionMode,

    /// Tree started by `start_logic` when none was started explicitly
    pub default_tree: Option<String>,

    /// Maximum number of subtree instances on the execution stack
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    /// Maximum number of distinct (asset, origin path) identities remembered
    #[serde(default = "default_max_known_instances")]
    pub max_known_instances: usize,

    /// Global seed mixed with the agent id for service timer jitter
    pub seed: u64,

    /// Timing for services built without explicit settings
    pub service: ServiceDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefaults {
    #[serde(default = "default_service_interval")]
    pub interval: f32,

    #[serde(default = "default_service_deviation")]
    pub random_deviation: f32,

    pub call_tick_on_search_start: bool,

    pub restart_timer_on_activation: bool,
}

fn default_max_stack_depth() -> usize {
    32
}
fn default_max_known_instances() -> usize {
    255
}
fn default_service_interval() -> f32 {
    0.5
}
fn default_service_deviation() -> f32 {
    0.1
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            interval: default_service_interval(),
            random_deviation: default_service_deviation(),
            call_tick_on_search_start: false,
            restart_timer_on_activation: false,
        }
    }
}

impl ServiceDefaults {
    pub fn timing(&self) -> ServiceTiming {
        ServiceTiming {
            interval: self.interval.max(0.0),
            random_deviation: self.random_deviation.max(0.0),
            call_tick_on_search_start: self.call_tick_on_search_start,
            restart_timer_on_activation: self.restart_timer_on_activation,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::default(),
            default_tree: None,
            max_stack_depth: default_max_stack_depth(),
            max_known_instances: default_max_known_instances(),
            seed: 0,
            service: ServiceDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse engine config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse engine config from {}", path.display()))
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
