//! Handshake error taxonomy.

use thiserror::Error;

use crate::config::ConfigError;
use crate::device::DeviceIdentity;
use crate::events::Stage;
use crate::protocol::PING_PACKET_SIZE;
use crate::transport::TransportError;

/// Terminal failure of one handshake run. Each variant corresponds to the
/// stage that failed; transport details are kept as the source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Rejected before any USB traffic.
    #[error("invalid handshake configuration")]
    InvalidConfig(#[from] ConfigError),

    #[error("device {identity} not found")]
    DeviceNotFound {
        identity: DeviceIdentity,
        #[source]
        source: TransportError,
    },

    #[error("device {identity} did not reappear after mode switch ({attempts} attempts)")]
    DeviceNotFoundAfterSwitch {
        identity: DeviceIdentity,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("mode switch request failed")]
    ModeSwitchFailed {
        #[source]
        source: TransportError,
    },

    #[error("failed to set configuration {configuration}")]
    ConfigurationFailed {
        configuration: u8,
        #[source]
        source: TransportError,
    },

    #[error("failed to claim interface {interface}")]
    InterfaceClaimFailed {
        interface: u8,
        #[source]
        source: TransportError,
    },

    #[error("failed to send PING on endpoint 0x{endpoint:02X}")]
    PingSendFailed {
        endpoint: u8,
        #[source]
        source: TransportError,
    },

    #[error("failed to receive PING on endpoint 0x{endpoint:02X}")]
    PingReceiveFailed {
        endpoint: u8,
        #[source]
        source: TransportError,
    },

    /// The device answered, but not with the probe.
    #[error("PING echo mismatch at byte {offset}: sent {expected:02X?}, received {received:02X?}")]
    PingMismatch {
        offset: usize,
        expected: [u8; PING_PACKET_SIZE],
        received: [u8; PING_PACKET_SIZE],
    },
}

impl HandshakeError {
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            HandshakeError::InvalidConfig(_) => Stage::Discover,
            HandshakeError::DeviceNotFound { .. } => Stage::Discover,
            HandshakeError::DeviceNotFoundAfterSwitch { .. } => Stage::Rediscover,
            HandshakeError::ModeSwitchFailed { .. } => Stage::ModeSwitch,
            HandshakeError::ConfigurationFailed { .. } => Stage::Configure,
            HandshakeError::InterfaceClaimFailed { .. } => Stage::ClaimInterface,
            HandshakeError::PingSendFailed { .. } => Stage::SendPing,
            HandshakeError::PingReceiveFailed { .. } => Stage::ReceivePing,
            HandshakeError::PingMismatch { .. } => Stage::VerifyEcho,
        }
    }

    /// Whether the failure is a protocol violation rather than a
    /// connectivity or transport problem.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, HandshakeError::PingMismatch { .. })
    }
}
