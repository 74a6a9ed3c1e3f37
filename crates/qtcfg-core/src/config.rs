//! Handshake configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceIdentity;
use crate::protocol::constants::*;
use crate::protocol::{ModeSwitchRequest, PingPacket};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OUT endpoint 0x{0:02X} has the IN direction bit set")]
    OutEndpointDirection(u8),
    #[error("IN endpoint 0x{0:02X} is missing the IN direction bit")]
    InEndpointDirection(u8),
    #[error("mode switch must be a host-to-device request with a defined type and recipient ({0})")]
    InvalidModeSwitch(ModeSwitchRequest),
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
    #[error("PING reserved field must be zero, got 0x{0:08X}")]
    PingReservedNonZero(u32),
}

/// Per-step timing, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Timeout for each control and bulk transfer.
    pub transfer_ms: u64,
    /// Blind wait after the mode switch before the first reconnect attempt.
    pub settle_ms: u64,
    /// How long to keep polling for the re-enumerated device after settling.
    /// Zero means a single attempt.
    pub reconnect_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transfer_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_DELAY_MS,
            reconnect_ms: DEFAULT_RECONNECT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Timeouts {
    pub fn transfer(&self) -> Duration {
        Duration::from_millis(self.transfer_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Everything the handshake needs to know about the device. Immutable for
/// the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// `bConfigurationValue` selected after the mode switch.
    pub target_configuration: u8,
    /// Interface carrying the bulk endpoints.
    pub interface: u8,
    pub out_endpoint: u8,
    pub in_endpoint: u8,
    pub identity: DeviceIdentity,
    pub mode_switch: ModeSwitchRequest,
    pub ping: PingPacket,
    pub timeouts: Timeouts,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            target_configuration: QT_CONFIGURATION,
            interface: QT_DATA_INTERFACE,
            out_endpoint: QT_BULK_OUT_EP,
            in_endpoint: QT_BULK_IN_EP,
            identity: DeviceIdentity::default(),
            mode_switch: ModeSwitchRequest::default(),
            ping: PingPacket::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl HandshakeConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: HandshakeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.out_endpoint & ENDPOINT_DIR_IN != 0 {
            return Err(ConfigError::OutEndpointDirection(self.out_endpoint));
        }
        if self.in_endpoint & ENDPOINT_DIR_IN == 0 {
            return Err(ConfigError::InEndpointDirection(self.in_endpoint));
        }
        if !self.mode_switch.is_valid() {
            return Err(ConfigError::InvalidModeSwitch(self.mode_switch));
        }
        if self.timeouts.transfer_ms == 0 {
            return Err(ConfigError::ZeroTimeout("transfer timeout"));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroTimeout("poll interval"));
        }
        if self.ping.reserved != 0 {
            return Err(ConfigError::PingReservedNonZero(self.ping.reserved));
        }
        Ok(())
    }
}
