use crate::capture::DebouncePolicy;
use crate::replay::GotoPolicy;
use crate::selector::SelectorStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetraceConfig {
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub selector_strategy: SelectorStrategy,
    #[serde(default)]
    pub debounce_policy: DebouncePolicy,
    /// Persist `{active, session}` to the storage path after every mutation.
    #[serde(default)]
    pub persist: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            selector_strategy: SelectorStrategy::default(),
            debounce_policy: DebouncePolicy::default(),
            persist: false,
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    700
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default)]
    pub goto_policy: GotoPolicy,
    #[serde(default)]
    pub start_url: Option<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            pacing_ms: default_pacing_ms(),
            goto_policy: GotoPolicy::default(),
            start_url: None,
        }
    }
}

fn default_wait_timeout_ms() -> u64 {
    5000
}

fn default_navigation_timeout_ms() -> u64 {
    5000
}

fn default_pacing_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".retrace").join("state.json"))
        .unwrap_or_else(|| PathBuf::from("retrace-state.json"))
}
