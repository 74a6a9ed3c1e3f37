//! Device identity shared by both enumeration states.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{APPLE_VENDOR_ID, DEFAULT_PRODUCT_ID};

/// Vendor/product pair used to find the device before and after the mode
/// switch. The bus address is not part of the identity since it may change
/// on re-enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(APPLE_VENDOR_ID, DEFAULT_PRODUCT_ID)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}
