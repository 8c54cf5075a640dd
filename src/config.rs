use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;

use crate::codec::LEGACY_ADVERTISEMENT_BYTES;
use crate::session::DEFAULT_SCAN_DURATION;

pub const DEFAULT_CONFIG_PATH: &str = "eddystone-chat.toml";
const DEFAULT_SETTINGS_PATH: &str = "eddystone-chat-settings.json";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub advertise: Option<AdvertiseConfig>,
    pub scan: Option<ScanConfig>,
    pub settings: Option<SettingsConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AdvertiseConfig {
    /// 31 for legacy advertising; larger with extended advertising.
    pub max_advertisement_bytes: Option<usize>,
    pub connectable: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub duration_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SettingsConfig {
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// A missing file at the default location means all defaults; a missing
    /// file the operator asked for is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !path.exists() {
            return Ok(AppConfig::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn max_advertisement_bytes(&self) -> usize {
        self.advertise
            .as_ref()
            .and_then(|a| a.max_advertisement_bytes)
            .unwrap_or(LEGACY_ADVERTISEMENT_BYTES)
    }

    pub fn connectable(&self) -> bool {
        self.advertise
            .as_ref()
            .and_then(|a| a.connectable)
            .unwrap_or(true)
    }

    pub fn scan_duration(&self) -> Duration {
        self.scan
            .as_ref()
            .and_then(|s| s.duration_seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCAN_DURATION)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [advertise]
            max_advertisement_bytes = 251
            connectable = false

            [scan]
            duration_seconds = 30

            [settings]
            path = "/tmp/beacon.json"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert_eq!(config.max_advertisement_bytes(), 251);
        assert!(!config.connectable());
        assert_eq!(config.scan_duration(), Duration::from_secs(30));
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/beacon.json"));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::de::from_str("[scan]").unwrap();
        assert_eq!(config.max_advertisement_bytes(), 31);
        assert!(config.connectable());
        assert_eq!(config.scan_duration(), Duration::from_secs(220));
        assert_eq!(
            config.settings_path(),
            PathBuf::from("eddystone-chat-settings.json")
        );
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/eddystone-chat.toml");
        assert!(AppConfig::load(Some(missing)).is_err());
    }
}
