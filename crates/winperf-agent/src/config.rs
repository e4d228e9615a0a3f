use std::{path::Path, time::Duration};

use serde::Deserialize;
use winperf_common::{CounterSetConfig, CounterSpec, Result, WinperfError};
use winperf_provider::SimFixture;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub sets: Vec<CounterSetEntry>,
    /// Landscape for the simulated provider; ignored on reload.
    #[serde(default)]
    pub simulation: SimFixture,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterSetEntry {
    pub host: String,
    pub interval_secs: u64,
    pub counters: Vec<String>,
}

impl CounterSetEntry {
    pub fn to_config(&self) -> CounterSetConfig {
        CounterSetConfig {
            host: self.host.clone(),
            interval: Duration::from_secs(self.interval_secs),
            counters: self
                .counters
                .iter()
                .map(|path| CounterSpec::new(path.clone()))
                .collect(),
        }
    }
}

impl AgentConfig {
    pub fn set_configs(&self) -> Vec<CounterSetConfig> {
        self.sets.iter().map(CounterSetEntry::to_config).collect()
    }

    fn validate(&self) -> Result<()> {
        for entry in &self.sets {
            if entry.interval_secs == 0 {
                return Err(WinperfError::Config(format!(
                    "counter set for {} has a zero interval",
                    entry.host
                )));
            }
        }
        Ok(())
    }
}

pub fn load(path: &Path) -> Result<AgentConfig> {
    let bytes = std::fs::read(path)?;
    let config: AgentConfig = serde_json::from_slice(&bytes).map_err(|err| {
        WinperfError::Config(format!("failed to parse {}: {err}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}
