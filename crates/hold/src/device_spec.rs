//! Command-line device specification parsing
//!
//! Emulator-style argument lists name pass-through devices as
//! `-device usb-host,vendorid=0x0b05,productid=0x17cb,bus=...`. This module
//! scans a flat argument list for those pairs and turns each well-formed
//! specification into a [`DeviceIdentifier`]. A malformed specification only
//! drops its own entry; the scan always continues with the next token.

use common::DeviceIdentifier;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Flag token that introduces a device specification
pub const DEVICE_FLAG: &str = "-device";

/// Required prefix of a USB host pass-through specification
pub const USB_HOST_PREFIX: &str = "usb-host";

const VENDOR_KEY: &str = "vendorid";
const PRODUCT_KEY: &str = "productid";

/// Reasons a single device specification is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("specification does not start with `usb-host`")]
    MissingPrefix,

    #[error("missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("invalid hex value for `{key}`: {value:?}")]
    InvalidHex { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    ProcessingDevice,
}

/// Scan an argument list and return every device it requests, in order
pub fn parse_arguments<I, S>(args: I) -> Vec<DeviceIdentifier>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut state = ScanState::Scanning;
    let mut devices = Vec::new();

    for arg in args {
        let arg = arg.as_ref();
        state = match state {
            ScanState::Scanning if arg == DEVICE_FLAG => ScanState::ProcessingDevice,
            ScanState::Scanning => ScanState::Scanning,
            ScanState::ProcessingDevice => {
                match parse_device_spec(arg) {
                    Ok(id) => {
                        debug!("Accepted device specification {:?} as {}", arg, id);
                        devices.push(id);
                    }
                    Err(SpecError::MissingPrefix) => {
                        // Other -device kinds (network cards, displays) are common
                        debug!("Ignoring non usb-host device {:?}", arg);
                    }
                    Err(e) => {
                        warn!("Rejected device specification {:?}: {}", arg, e);
                    }
                }
                ScanState::Scanning
            }
        };
    }

    if state == ScanState::ProcessingDevice {
        debug!("Trailing {} flag without a specification", DEVICE_FLAG);
    }

    devices
}

/// Decode one `usb-host,key=value,...` specification
pub fn parse_device_spec(spec: &str) -> Result<DeviceIdentifier, SpecError> {
    let rest = spec
        .strip_prefix(USB_HOST_PREFIX)
        .ok_or(SpecError::MissingPrefix)?;

    let properties = parse_properties(rest);

    let vendor_id = required_hex(&properties, VENDOR_KEY)?;
    let product_id = required_hex(&properties, PRODUCT_KEY)?;

    Ok(DeviceIdentifier::new(vendor_id, product_id))
}

/// Split `,k=v,k=v` into a map; later duplicates overwrite earlier ones
fn parse_properties(rest: &str) -> HashMap<&str, &str> {
    rest.split(',')
        .filter_map(|component| component.split_once('='))
        .collect()
}

fn required_hex(properties: &HashMap<&str, &str>, key: &'static str) -> Result<u16, SpecError> {
    let value = properties.get(key).ok_or(SpecError::MissingKey(key))?;

    parse_hex_u16(value).ok_or_else(|| SpecError::InvalidHex {
        key,
        value: (*value).to_string(),
    })
}

/// Parse an unsigned hex number with optional `0x`/`0X` prefix
pub fn parse_hex_u16(value: &str) -> Option<u16> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    // from_str_radix would also accept a leading '+'
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    u16::from_str_radix(digits, 16).ok()
}
