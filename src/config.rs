//! Filter configuration file
//!
//! ```toml
//! [filter]
//! pid = 42
//! bundle_id = "com.example.app"
//! types = ["error", "fault"]
//!
//! [filter.message]
//! pattern = "failed"
//! mode = "contains"
//! ignore_case = true
//!
//! [stream]
//! workers = 4
//! tail = 100
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use logsieve_filter::{
    BundleIdentityResolver, EntryFilter, FilterError, MessageEvent, TextFilter, TextMode,
};

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// `[filter]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub message: Option<TextRule>,
    pub process: Option<TextRule>,
    pub subsystem: Option<TextRule>,
    pub category: Option<TextRule>,
    pub pid: Option<i32>,
    pub bundle_id: Option<String>,
    /// Accepted message types (all when absent)
    pub types: Option<Vec<MessageEvent>>,
}

/// A text criterion as written in the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextRule {
    pub pattern: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub ignore_case: bool,
}

/// `[stream]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub workers: Option<usize>,
    /// Print only the last N matches at end of input
    pub tail: Option<usize>,
}

impl Config {
    /// Load a config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

impl TextRule {
    pub fn compile(&self) -> Result<TextFilter, FilterError> {
        let mode = match &self.mode {
            Some(mode) => mode.parse()?,
            None => TextMode::default(),
        };
        TextFilter::new(mode, &self.pattern, self.ignore_case)
    }
}

impl FilterConfig {
    /// Build the entry filter described by this table
    pub fn build(&self, resolver: Arc<BundleIdentityResolver>) -> Result<EntryFilter, FilterError> {
        let mut filter = EntryFilter::new(resolver)
            .with_process_id(self.pid)
            .with_bundle_identifier(self.bundle_id.as_deref());

        if let Some(rule) = &self.message {
            filter = filter.with_message_text(rule.compile()?);
        }
        if let Some(rule) = &self.process {
            filter = filter.with_process(rule.compile()?);
        }
        if let Some(rule) = &self.subsystem {
            filter = filter.with_subsystem(rule.compile()?);
        }
        if let Some(rule) = &self.category {
            filter = filter.with_category(rule.compile()?);
        }
        if let Some(types) = &self.types {
            filter.set_accepted_types(types.iter().copied());
        }

        Ok(filter)
    }
}
