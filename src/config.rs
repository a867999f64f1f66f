//! Runtime configuration

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub inference: InferenceConfig,
}

/// Executor tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Intra-op thread count for each session.
    pub intra_threads: usize,
    /// Graph optimization level: "disable", "basic", "extended" or "all".
    pub optimization_level: String,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            intra_threads: 1,
            optimization_level: "basic".to_string(),
        }
    }
}
