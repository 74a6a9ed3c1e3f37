//! Scoped ownership of transport resources.
//!
//! `OpenDevice` closes its handle and `ClaimedInterface` releases its claim
//! when dropped. A claim borrows the device it was taken from, so it is
//! always released before that device is closed.

use std::time::Duration;

use super::traits::{TransportError, UsbTransport};
use crate::device::DeviceIdentity;
use crate::protocol::ModeSwitchRequest;

/// An open device handle, closed on drop.
pub struct OpenDevice<'t, T: UsbTransport> {
    transport: &'t T,
    handle: T::Handle,
    identity: DeviceIdentity,
}

impl<'t, T: UsbTransport> OpenDevice<'t, T> {
    pub fn open(transport: &'t T, identity: DeviceIdentity) -> Result<Self, TransportError> {
        let handle = transport.open(identity)?;
        Ok(Self {
            transport,
            handle,
            identity,
        })
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn handle(&self) -> &T::Handle {
        &self.handle
    }

    pub fn control_transfer(
        &self,
        request: &ModeSwitchRequest,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.transport
            .control_transfer(&self.handle, request, timeout)
    }

    pub fn set_configuration(&self, configuration: u8) -> Result<(), TransportError> {
        self.transport.set_configuration(&self.handle, configuration)
    }

    pub fn claim_interface(
        &self,
        interface: u8,
    ) -> Result<ClaimedInterface<'_, 't, T>, TransportError> {
        let claim = self.transport.claim_interface(&self.handle, interface)?;
        Ok(ClaimedInterface {
            device: self,
            claim,
            interface,
        })
    }

    /// Close the handle now. The guard is consumed so the handle cannot be
    /// used afterwards.
    pub fn close(self) {
        drop(self);
    }
}

impl<T: UsbTransport> Drop for OpenDevice<'_, T> {
    fn drop(&mut self) {
        self.transport.close(&mut self.handle);
    }
}

/// A claimed interface, released on drop.
pub struct ClaimedInterface<'d, 't, T: UsbTransport> {
    device: &'d OpenDevice<'t, T>,
    claim: T::Claim,
    interface: u8,
}

impl<T: UsbTransport> ClaimedInterface<'_, '_, T> {
    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.device
            .transport
            .bulk_write(&self.claim, endpoint, data, timeout)
    }

    pub fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.device
            .transport
            .bulk_read(&self.claim, endpoint, buf, timeout)
    }

    pub fn release(self) {
        drop(self);
    }
}

impl<T: UsbTransport> Drop for ClaimedInterface<'_, '_, T> {
    fn drop(&mut self) {
        self.device.transport.release_interface(&mut self.claim);
    }
}
