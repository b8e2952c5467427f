//! USB type abstractions and utilities

use std::fmt;

/// Vendor/product pair naming one USB device model
///
/// Two devices of the same model share an identifier; the hold layer picks
/// the first one the host enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentifier {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentifier {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Check whether a device descriptor's VID/PID matches this identifier
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl From<(u16, u16)> for DeviceIdentifier {
    fn from((vendor_id, product_id): (u16, u16)) -> Self {
        Self::new(vendor_id, product_id)
    }
}
