//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};
use crate::device::DeviceIdentity;
use crate::protocol::ModeSwitchRequest;

/// A transport call as seen by the mock. Handle ids start at 1 and grow
/// with every successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Open { identity: DeviceIdentity },
    ControlTransfer { handle: u32, request: ModeSwitchRequest },
    SetConfiguration { handle: u32, configuration: u8 },
    ClaimInterface { handle: u32, interface: u8 },
    ReleaseInterface { handle: u32, interface: u8 },
    BulkWrite { handle: u32, endpoint: u8, data: Vec<u8> },
    BulkRead { handle: u32, endpoint: u8, len: usize },
    Close { handle: u32 },
}

impl MockCall {
    /// Handle the call operated on, if any.
    pub fn handle(&self) -> Option<u32> {
        match self {
            MockCall::Open { .. } => None,
            MockCall::ControlTransfer { handle, .. }
            | MockCall::SetConfiguration { handle, .. }
            | MockCall::ClaimInterface { handle, .. }
            | MockCall::ReleaseInterface { handle, .. }
            | MockCall::BulkWrite { handle, .. }
            | MockCall::BulkRead { handle, .. }
            | MockCall::Close { handle } => Some(*handle),
        }
    }
}

#[derive(Debug)]
pub struct MockHandle {
    id: u32,
    open: bool,
}

impl MockHandle {
    pub fn id(&self) -> u32 {
        self.id
    }
}

#[derive(Debug)]
pub struct MockClaim {
    handle: u32,
    interface: u8,
    claimed: bool,
}

#[derive(Debug)]
enum OpenScript {
    Present,
    Absent,
    Error(TransportError),
}

#[derive(Debug, Default)]
struct Script {
    /// Per-attempt open results, consumed in order.
    opens: VecDeque<OpenScript>,
    /// Whether the device is missing once `opens` runs dry.
    absent: bool,
    control: Option<TransportError>,
    set_configuration: Option<TransportError>,
    claim: Option<TransportError>,
    write: Option<Result<usize, TransportError>>,
    /// Fixed read response; echoes the last write when unset.
    read: Option<Result<Vec<u8>, TransportError>>,
    last_write: Vec<u8>,
}

/// Resources the mock actually handed out.
#[derive(Debug, Default)]
struct Acquired {
    handles: Vec<u32>,
    claims: Vec<u32>,
}

/// Scripted transport for unit testing the handshake.
///
/// Healthy by default: the device is present, every step succeeds and the
/// IN endpoint echoes the last OUT write. Clones share state, so a test can
/// keep one clone to inspect calls made through another.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    acquired: Arc<Mutex<Acquired>>,
    next_handle: Arc<AtomicU32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful open for the next attempt.
    pub fn queue_present(&self) {
        self.script
            .lock()
            .unwrap()
            .opens
            .push_back(OpenScript::Present);
    }

    /// Queue `count` open attempts that find no device.
    pub fn queue_absent(&self, count: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..count {
            script.opens.push_back(OpenScript::Absent);
        }
    }

    /// Queue an open attempt that fails with `error`.
    pub fn queue_open_error(&self, error: TransportError) {
        self.script
            .lock()
            .unwrap()
            .opens
            .push_back(OpenScript::Error(error));
    }

    /// Make the device missing once the open queue is empty.
    pub fn device_absent(&self) {
        self.script.lock().unwrap().absent = true;
    }

    pub fn fail_control(&self, error: TransportError) {
        self.script.lock().unwrap().control = Some(error);
    }

    pub fn fail_set_configuration(&self, error: TransportError) {
        self.script.lock().unwrap().set_configuration = Some(error);
    }

    pub fn fail_claim(&self, error: TransportError) {
        self.script.lock().unwrap().claim = Some(error);
    }

    /// Override the result of every bulk write.
    pub fn set_write_result(&self, result: Result<usize, TransportError>) {
        self.script.lock().unwrap().write = Some(result);
    }

    /// Answer every bulk read with `bytes` instead of echoing.
    pub fn respond_with(&self, bytes: &[u8]) {
        self.script.lock().unwrap().read = Some(Ok(bytes.to_vec()));
    }

    pub fn fail_read(&self, error: TransportError) {
        self.script.lock().unwrap().read = Some(Err(error));
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Ids of handles returned by successful opens.
    pub fn opened_handles(&self) -> Vec<u32> {
        self.acquired.lock().unwrap().handles.clone()
    }

    /// Handle ids of successful interface claims.
    pub fn granted_claims(&self) -> Vec<u32> {
        self.acquired.lock().unwrap().claims.clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Close { .. }))
    }

    pub fn release_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::ReleaseInterface { .. }))
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_open(handle: &MockHandle) -> Result<(), TransportError> {
        if handle.open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn check_claimed(claim: &MockClaim) -> Result<(), TransportError> {
        if claim.claimed {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl UsbTransport for MockTransport {
    type Handle = MockHandle;
    type Claim = MockClaim;

    fn open(&self, identity: DeviceIdentity) -> Result<MockHandle, TransportError> {
        self.record(MockCall::Open { identity });
        let mut script = self.script.lock().unwrap();
        let next = script.opens.pop_front().unwrap_or(if script.absent {
            OpenScript::Absent
        } else {
            OpenScript::Present
        });
        match next {
            OpenScript::Present => {
                let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
                self.acquired.lock().unwrap().handles.push(id);
                Ok(MockHandle { id, open: true })
            }
            OpenScript::Absent => Err(TransportError::DeviceNotFound {
                vid: identity.vendor_id,
                pid: identity.product_id,
            }),
            OpenScript::Error(e) => Err(e),
        }
    }

    fn control_transfer(
        &self,
        handle: &MockHandle,
        request: &ModeSwitchRequest,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.record(MockCall::ControlTransfer {
            handle: handle.id,
            request: *request,
        });
        Self::check_open(handle)?;
        match &self.script.lock().unwrap().control {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn set_configuration(
        &self,
        handle: &MockHandle,
        configuration: u8,
    ) -> Result<(), TransportError> {
        self.record(MockCall::SetConfiguration {
            handle: handle.id,
            configuration,
        });
        Self::check_open(handle)?;
        match &self.script.lock().unwrap().set_configuration {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn claim_interface(
        &self,
        handle: &MockHandle,
        interface: u8,
    ) -> Result<MockClaim, TransportError> {
        self.record(MockCall::ClaimInterface {
            handle: handle.id,
            interface,
        });
        Self::check_open(handle)?;
        match &self.script.lock().unwrap().claim {
            Some(e) => Err(e.clone()),
            None => {
                self.acquired.lock().unwrap().claims.push(handle.id);
                Ok(MockClaim {
                    handle: handle.id,
                    interface,
                    claimed: true,
                })
            }
        }
    }

    fn release_interface(&self, claim: &mut MockClaim) {
        if !claim.claimed {
            return;
        }
        claim.claimed = false;
        self.record(MockCall::ReleaseInterface {
            handle: claim.handle,
            interface: claim.interface,
        });
    }

    fn bulk_write(
        &self,
        claim: &MockClaim,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.record(MockCall::BulkWrite {
            handle: claim.handle,
            endpoint,
            data: data.to_vec(),
        });
        Self::check_claimed(claim)?;
        let mut script = self.script.lock().unwrap();
        let written = match &script.write {
            Some(Ok(n)) => (*n).min(data.len()),
            Some(Err(e)) => return Err(e.clone()),
            None => data.len(),
        };
        script.last_write = data[..written].to_vec();
        Ok(written)
    }

    fn bulk_read(
        &self,
        claim: &MockClaim,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.record(MockCall::BulkRead {
            handle: claim.handle,
            endpoint,
            len: buf.len(),
        });
        Self::check_claimed(claim)?;
        let script = self.script.lock().unwrap();
        let response = match &script.read {
            Some(Ok(bytes)) => bytes.as_slice(),
            Some(Err(e)) => return Err(e.clone()),
            None => script.last_write.as_slice(),
        };
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn close(&self, handle: &mut MockHandle) {
        if !handle.open {
            return;
        }
        handle.open = false;
        self.record(MockCall::Close { handle: handle.id });
    }
}
