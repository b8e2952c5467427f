//! USB subsystem
//!
//! Acquires and releases exclusive holds on USB devices.
//!
//! - [`backend`]: the host platform seam (match, authorize, capture, reset, release)
//! - [`device`]: the libusb binding of that seam
//! - [`worker`]: the per-device serial execution context
//! - [`assertion`]: the per-device hold lifecycle

pub mod assertion;
pub mod backend;
pub mod device;
pub mod worker;

// Re-export public types
pub use assertion::{AcquireError, AssertionState, ExclusiveAccessAssertion};
pub use backend::{BackendError, UsbBackend};
pub use device::{DeviceSummary, RusbBackend};
pub use worker::SerialContext;
