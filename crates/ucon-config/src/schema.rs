//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Engine-level settings
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Conditions applied to every session
    #[serde(default)]
    pub conditions: Vec<RawCondition>,

    /// Obligations applied to every session
    #[serde(default)]
    pub obligations: Vec<RawObligation>,
}

/// Engine-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEngineConfig {
    /// Monitor tick interval in milliseconds (default: 200)
    pub monitor_interval_ms: Option<u64>,

    /// Number of audit records retained in memory (default: 1024)
    pub audit_capacity: Option<usize>,

    /// Buffer size of the engine event channel (default: 64)
    pub event_capacity: Option<usize>,
}

/// Raw condition definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCondition {
    pub id: String,

    /// Evaluator name, e.g. "location" or "vip_level"
    pub name: String,

    /// "one" or "always"
    #[serde(default = "default_condition_kind")]
    pub kind: String,

    #[serde(default)]
    pub expr: String,
}

/// Raw obligation definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawObligation {
    pub id: String,

    /// Executor name, e.g. "user_authentication" or "access_logging"
    pub name: String,

    /// "pre", "ongoing" or "post"
    pub phase: String,

    #[serde(default)]
    pub expr: String,
}

fn default_condition_kind() -> String {
    "always".to_string()
}
