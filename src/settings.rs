use std::path::PathBuf;

use anyhow::Context as _;
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};

use crate::profile::{AdvertiseMode, PowerProfile, TxPowerLevel};

/// What the operator chose last time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub last_message: String,
    pub tx_power_level: TxPowerLevel,
    pub advertise_mode: AdvertiseMode,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            last_message: "Sample".to_string(),
            tx_power_level: TxPowerLevel::Medium,
            advertise_mode: AdvertiseMode::LowLatency,
        }
    }
}

impl Settings {
    pub fn profile(&self) -> PowerProfile {
        PowerProfile {
            advertise_mode: self.advertise_mode,
            tx_power_level: self.tx_power_level,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SettingsStore { path: path.into() }
    }

    /// Never fails: an absent or unreadable file yields the defaults.
    pub fn load(&self) -> Settings {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                debug!("No saved settings at {}: {}", self.path.display(), err);
                return Settings::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!(
                "Ignoring unreadable settings {}: {}",
                self.path.display(),
                err
            );
            Settings::default()
        })
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to save settings to {}", self.path.display()))?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}
