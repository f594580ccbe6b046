// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Driver configuration.

use std::str::FromStr;
use thiserror::Error;

/// Which interrupt mechanisms the driver may use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum InterruptPolicy {
    /// Try MSI-X first and fall back to MSI.
    #[default]
    MsixThenMsi,
    /// Use MSI only.
    MsiOnly,
}

/// Error returned for an unsupported interrupt policy value.
#[derive(Debug, Error)]
#[error("bad interrupt policy {0}, only MSI-X (2) and MSI (1) are supported")]
pub struct ConfigError(pub String);

impl TryFrom<i32> for InterruptPolicy {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::MsixThenMsi),
            1 => Ok(Self::MsiOnly),
            v => Err(ConfigError(v.to_string())),
        }
    }
}

impl FromStr for InterruptPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "msix" => Ok(Self::MsixThenMsi),
            "msi" => Ok(Self::MsiOnly),
            other => other
                .parse::<i32>()
                .map_err(|_| ConfigError(other.to_owned()))
                .and_then(Self::try_from),
        }
    }
}

/// Adapter-wide configuration supplied at probe time.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Interrupt mechanism selection.
    pub interrupts: InterruptPolicy,
}

impl DriverConfig {
    /// Builds a configuration from the legacy `msi` module parameter.
    pub fn from_msi_param(msi: i32) -> Result<Self, ConfigError> {
        Ok(Self {
            interrupts: msi.try_into()?,
        })
    }
}
