//! Engine configuration, layered from an optional file and environment.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use flow_runner::EngineLimits;
use recording_session::BarrierConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub limits: EngineLimits,
    pub barrier: BarrierConfig,
}

impl EngineConfig {
    /// Load configuration: defaults, overridden by `reflow.toml` when
    /// present, overridden by `REFLOW_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("reflow").required(false))
            .add_source(Environment::with_prefix("REFLOW").separator("__"))
            .build()?;
        Ok(settings.try_deserialize().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.max_foreach_concurrency, 8);
        assert_eq!(config.limits.wait_cap_ms, 120_000);
        assert!(config.barrier.main_frame_timeout_ms > config.barrier.subframe_timeout_ms);
    }
}
