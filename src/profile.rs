use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde_derive::{Deserialize, Serialize};

use crate::error::UnknownLabel;

#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AdvertiseMode {
    #[default]
    LowLatency,
    Balanced,
    LowPower,
}

impl AdvertiseMode {
    /// Advertising interval the host is asked to use.
    pub fn interval(&self) -> Duration {
        match self {
            AdvertiseMode::LowLatency => Duration::from_millis(100),
            AdvertiseMode::Balanced => Duration::from_millis(250),
            AdvertiseMode::LowPower => Duration::from_millis(1000),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AdvertiseMode::LowLatency => "low-latency",
            AdvertiseMode::Balanced => "balanced",
            AdvertiseMode::LowPower => "low-power",
        }
    }
}

#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TxPowerLevel {
    High,
    #[default]
    Medium,
    Low,
    UltraLow,
}

impl TxPowerLevel {
    /// Transmit power in dBm handed to the advertiser.
    pub fn radiated_dbm(&self) -> i16 {
        match self {
            TxPowerLevel::High => 1,
            TxPowerLevel::Medium => -7,
            TxPowerLevel::Low => -15,
            TxPowerLevel::UltraLow => -21,
        }
    }

    /// Received power at 0 m for this level, as Eddystone frames report it.
    pub fn calibrated_dbm(&self) -> i8 {
        match self {
            TxPowerLevel::High => -16,
            TxPowerLevel::Medium => -26,
            TxPowerLevel::Low => -35,
            TxPowerLevel::UltraLow => -59,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TxPowerLevel::High => "high",
            TxPowerLevel::Medium => "medium",
            TxPowerLevel::Low => "low",
            TxPowerLevel::UltraLow => "ultra-low",
        }
    }
}

fn parse_label<T: ValueEnum>(kind: &'static str, label: &str) -> Result<T, UnknownLabel> {
    let normalized = label.trim().to_lowercase().replace([' ', '_'], "-");
    <T as ValueEnum>::from_str(&normalized, true).map_err(|_| UnknownLabel {
        kind,
        label: label.to_string(),
    })
}

impl FromStr for AdvertiseMode {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label("Tx mode", s)
    }
}

impl FromStr for TxPowerLevel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label("Tx power", s)
    }
}

impl fmt::Display for AdvertiseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for TxPowerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One value per axis, defaulting to low latency at medium power.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerProfile {
    pub advertise_mode: AdvertiseMode,
    pub tx_power_level: TxPowerLevel,
}

impl fmt::Display for PowerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tx power = {}, mode = {}",
            self.tx_power_level, self.advertise_mode
        )
    }
}
