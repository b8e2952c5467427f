//! usb-hold library
//!
//! Holds USB devices named on the command line exclusively for the lifetime
//! of the process. Devices are requested emulator-style with
//! `-device usb-host,vendorid=0x....,productid=0x....`; each match is
//! authorized, captured on its own serial context and released on shutdown.

#![deny(unused_must_use)]

pub mod config;
pub mod device_spec;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb;

pub use config::{CaptureSettings, HoldConfig};
pub use device_spec::{SpecError, parse_arguments, parse_device_spec};
pub use registry::{AssertionRegistry, Gate};
pub use usb::{AcquireError, AssertionState, BackendError, ExclusiveAccessAssertion, UsbBackend};
