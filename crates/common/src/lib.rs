//! Common utilities for usb-hold
//!
//! This crate provides the pieces shared by the hold library and binary:
//! the vendor/product device identifier, the common error type and the
//! tracing setup.

pub mod error;
pub mod logging;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::DeviceIdentifier;
