//! # Configuration Management
//!
//! Defaults applied by the boundary layer when the caller does not say
//! otherwise.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub query: QueryConfig,
    pub threads: ThreadPoolConfig,
    pub logging: LoggingConfig,
}

/// Query-time defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Name of the search-breadth parameter understood by graph methods
    pub search_breadth_param: String,
    /// Breadth used until the caller sets its own query-time parameters
    pub default_search_breadth: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            search_breadth_param: "efSearch".to_string(),
            default_search_breadth: 200,
        }
    }
}

impl QueryConfig {
    /// The default query-time parameter as a `name=value` entry
    pub fn default_entry(&self) -> String {
        format!("{}={}", self.search_breadth_param, self.default_search_breadth)
    }
}

/// Batch-query worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            default_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_size: 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Map the C-side integer (0 = trace .. 4 = error)
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Text,
    Json,
}
