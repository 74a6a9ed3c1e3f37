//! Mode switch control request.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::constants::*;

/// Data stage direction encoded in bit 7 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    HostToDevice,
    DeviceToHost,
}

/// Request type encoded in bits 5..6 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Recipient encoded in bits 0..4 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved(u8),
}

/// Vendor control transfer that makes the device re-enumerate with its
/// extended configuration. Has no data stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSwitchRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl Default for ModeSwitchRequest {
    fn default() -> Self {
        Self {
            request_type: MODE_SWITCH_REQUEST_TYPE,
            request: MODE_SWITCH_REQUEST,
            value: MODE_SWITCH_VALUE,
            index: MODE_SWITCH_INDEX,
        }
    }
}

impl ModeSwitchRequest {
    pub fn direction(&self) -> RequestDirection {
        if self.request_type & REQUEST_TYPE_DIR_IN != 0 {
            RequestDirection::DeviceToHost
        } else {
            RequestDirection::HostToDevice
        }
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type & REQUEST_TYPE_TYPE_MASK) >> 5 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> RequestRecipient {
        match self.request_type & REQUEST_TYPE_RECIPIENT_MASK {
            0 => RequestRecipient::Device,
            1 => RequestRecipient::Interface,
            2 => RequestRecipient::Endpoint,
            3 => RequestRecipient::Other,
            r => RequestRecipient::Reserved(r),
        }
    }

    /// A mode switch must be an OUT request with a defined type and recipient.
    pub fn is_valid(&self) -> bool {
        self.direction() == RequestDirection::HostToDevice
            && self.kind() != RequestKind::Reserved
            && !matches!(self.recipient(), RequestRecipient::Reserved(_))
    }
}

impl fmt::Display for ModeSwitchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bmRequestType=0x{:02X} bRequest=0x{:02X} wValue=0x{:04X} wIndex=0x{:04X}",
            self.request_type, self.request, self.value, self.index
        )
    }
}
