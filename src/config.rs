//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no config file at
//! all) yields a working engine. The CLI layers its flags on top.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// A matrix whose stored row sums are all within this distance of 1.0
    /// is reported as "proper" (already normalised to proportions).
    #[serde(default = "default_proper_tolerance")]
    pub proper_tolerance: f64,
    /// `top_k` switches to bounded insertion once `n >= k * insertion_ratio`.
    #[serde(default = "default_insertion_ratio")]
    pub insertion_ratio: usize,
    /// Number of requests the worker queue holds before `post` waits.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_proper_tolerance() -> f64 {
    0.01
}

fn default_insertion_ratio() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proper_tolerance: default_proper_tolerance(),
            insertion_ratio: default_insertion_ratio(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.proper_tolerance.is_finite() || self.proper_tolerance < 0.0 {
            return Err(EngineError::Config(format!(
                "proper_tolerance must be a non-negative number, got {}",
                self.proper_tolerance
            )));
        }
        if self.insertion_ratio == 0 {
            return Err(EngineError::Config("insertion_ratio must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
