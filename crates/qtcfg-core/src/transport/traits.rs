//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait the handshake consumes, allowing
//! different implementations (nusb, mock, etc.).

use std::time::Duration;
use thiserror::Error;

use crate::device::DeviceIdentity;
use crate::protocol::ModeSwitchRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Control transfer failed: {0}")]
    ControlTransferFailed(String),

    #[error("Failed to set configuration {configuration}: {message}")]
    ConfigurationFailed { configuration: u8, message: String },

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Handle or interface already closed")]
    Closed,

    #[error("Invalid control request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::DeviceNotFound { .. })
    }
}

/// Abstract USB transport interface.
///
/// A `Handle` is an open session with one device under its current
/// configuration; it is invalidated when the device re-enumerates. A `Claim`
/// reserves one interface of a handle, and bulk transfers go through it.
///
/// `release_interface` and `close` are best effort and idempotent: calling
/// them again on the same resource does nothing.
pub trait UsbTransport: Send + Sync {
    type Handle;
    type Claim;

    /// Open the first device matching `identity`.
    fn open(&self, identity: DeviceIdentity) -> Result<Self::Handle, TransportError>;

    /// Issue a control transfer with no data stage.
    fn control_transfer(
        &self,
        handle: &Self::Handle,
        request: &ModeSwitchRequest,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Select the active configuration by `bConfigurationValue`.
    fn set_configuration(
        &self,
        handle: &Self::Handle,
        configuration: u8,
    ) -> Result<(), TransportError>;

    fn claim_interface(
        &self,
        handle: &Self::Handle,
        interface: u8,
    ) -> Result<Self::Claim, TransportError>;

    fn release_interface(&self, claim: &mut Self::Claim);

    /// Write `data` to a bulk OUT endpoint, returning the bytes transferred.
    fn bulk_write(
        &self,
        claim: &Self::Claim,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Read into `buf` from a bulk IN endpoint, returning the bytes received.
    fn bulk_read(
        &self,
        claim: &Self::Claim,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn close(&self, handle: &mut Self::Handle);
}
