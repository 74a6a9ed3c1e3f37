//! nusb-based USB transport implementation.
//!
//! Key nusb 0.2 API patterns:
//! - `list_devices().wait()` for enumeration, `device_info.open().wait()` to open
//! - `device.control_out(..., timeout).wait()` for the vendor request
//! - `device.claim_interface(n).wait()` returns an `Interface`; dropping it releases
//! - `interface.endpoint::<Bulk, Out>(addr)` then `.writer()` / `.reader()` for I/O

use std::io::{self, Read, Write};
use std::time::Duration;

use nusb::transfer::{Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{TransportError, UsbTransport};
use crate::device::DeviceIdentity;
use crate::protocol::{BULK_BUFFER_SIZE, ModeSwitchRequest, RequestKind, RequestRecipient};

/// nusb-based USB transport.
#[derive(Debug, Default, Clone)]
pub struct NusbTransport {
    detach_kernel_driver: bool,
}

/// Open nusb device. `None` once closed.
pub struct NusbHandle {
    device: Option<Device>,
    identity: DeviceIdentity,
}

impl NusbHandle {
    fn device(&self) -> Result<&Device, TransportError> {
        self.device.as_ref().ok_or(TransportError::Closed)
    }
}

/// Claimed nusb interface. `None` once released.
pub struct NusbClaim {
    interface: Option<Interface>,
    number: u8,
}

impl NusbClaim {
    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Closed)
    }
}

impl NusbTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach any kernel driver bound to the interface before claiming it.
    pub fn with_kernel_driver_detach(mut self, detach: bool) -> Self {
        self.detach_kernel_driver = detach;
        self
    }
}

fn control_type(request: &ModeSwitchRequest) -> Result<ControlType, TransportError> {
    match request.kind() {
        RequestKind::Standard => Ok(ControlType::Standard),
        RequestKind::Class => Ok(ControlType::Class),
        RequestKind::Vendor => Ok(ControlType::Vendor),
        RequestKind::Reserved => Err(TransportError::InvalidRequest(format!(
            "reserved request type in 0x{:02X}",
            request.request_type
        ))),
    }
}

fn recipient(request: &ModeSwitchRequest) -> Result<Recipient, TransportError> {
    match request.recipient() {
        RequestRecipient::Device => Ok(Recipient::Device),
        RequestRecipient::Interface => Ok(Recipient::Interface),
        RequestRecipient::Endpoint => Ok(Recipient::Endpoint),
        RequestRecipient::Other => Ok(Recipient::Other),
        RequestRecipient::Reserved(r) => Err(TransportError::InvalidRequest(format!(
            "reserved recipient {r}"
        ))),
    }
}

fn map_io(
    e: io::Error,
    timeout: Duration,
    wrap: fn(String) -> TransportError,
) -> TransportError {
    if e.kind() == io::ErrorKind::TimedOut {
        TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        wrap(e.to_string())
    }
}

impl UsbTransport for NusbTransport {
    type Handle = NusbHandle;
    type Claim = NusbClaim;

    #[instrument(level = "info", skip_all, fields(identity = %identity))]
    fn open(&self, identity: DeviceIdentity) -> Result<NusbHandle, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| identity.matches(d.vendor_id(), d.product_id()))
            .ok_or(TransportError::DeviceNotFound {
                vid: identity.vendor_id,
                pid: identity.product_id,
            })?;

        info!(
            bus = %device_info.bus_id(),
            address = device_info.device_address(),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        Ok(NusbHandle {
            device: Some(device),
            identity,
        })
    }

    #[instrument(skip_all, fields(identity = %handle.identity, request = %request))]
    fn control_transfer(
        &self,
        handle: &NusbHandle,
        request: &ModeSwitchRequest,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let control = ControlOut {
            control_type: control_type(request)?,
            recipient: recipient(request)?,
            request: request.request,
            value: request.value,
            index: request.index,
            data: &[],
        };
        handle
            .device()?
            .control_out(control, timeout)
            .wait()
            .map_err(|e| TransportError::ControlTransferFailed(e.to_string()))?;

        debug!("Control transfer complete");
        Ok(())
    }

    #[instrument(skip_all, fields(identity = %handle.identity, configuration = configuration))]
    fn set_configuration(
        &self,
        handle: &NusbHandle,
        configuration: u8,
    ) -> Result<(), TransportError> {
        handle
            .device()?
            .set_configuration(configuration)
            .wait()
            .map_err(|e| TransportError::ConfigurationFailed {
                configuration,
                message: e.to_string(),
            })
    }

    #[instrument(skip_all, fields(identity = %handle.identity, interface = interface))]
    fn claim_interface(
        &self,
        handle: &NusbHandle,
        interface: u8,
    ) -> Result<NusbClaim, TransportError> {
        let device = handle.device()?;
        let claimed = if self.detach_kernel_driver {
            device.detach_and_claim_interface(interface).wait()
        } else {
            device.claim_interface(interface).wait()
        };
        let claimed = claimed.map_err(|e| TransportError::ClaimInterfaceFailed {
            interface,
            message: e.to_string(),
        })?;

        Ok(NusbClaim {
            interface: Some(claimed),
            number: interface,
        })
    }

    fn release_interface(&self, claim: &mut NusbClaim) {
        if claim.interface.take().is_some() {
            debug!(interface = claim.number, "Interface released");
        }
    }

    #[instrument(skip_all, fields(endpoint = %format!("0x{:02X}", endpoint), len = data.len()))]
    fn bulk_write(
        &self,
        claim: &NusbClaim,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let ep = claim
            .interface()?
            .endpoint::<Bulk, Out>(endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(BULK_BUFFER_SIZE).with_write_timeout(timeout);
        writer
            .write_all(data)
            .map_err(|e| map_io(e, timeout, TransportError::WriteFailed))?;
        writer
            .flush()
            .map_err(|e| map_io(e, timeout, TransportError::WriteFailed))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip_all, fields(endpoint = %format!("0x{:02X}", endpoint), max_len = buf.len()))]
    fn bulk_read(
        &self,
        claim: &NusbClaim,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let ep = claim
            .interface()?
            .endpoint::<Bulk, In>(endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(BULK_BUFFER_SIZE).with_read_timeout(timeout);
        let n = reader
            .read(buf)
            .map_err(|e| map_io(e, timeout, TransportError::ReadFailed))?;

        debug!(bytes_read = n, "Read complete");
        Ok(n)
    }

    fn close(&self, handle: &mut NusbHandle) {
        match handle.device.take() {
            Some(_device) => debug!(identity = %handle.identity, "Device closed"),
            None => debug!(identity = %handle.identity, "Handle already closed"),
        }
    }
}
