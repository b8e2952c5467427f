//! Host platform seam for device matching, authorization and capture
//!
//! The assertion lifecycle only talks to the host through [`UsbBackend`].
//! [`crate::usb::RusbBackend`] is the libusb binding; tests drive the
//! lifecycle with a recording mock.

use common::DeviceIdentifier;
use thiserror::Error;

/// Failure reported by a backend operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Device gone: {0}")]
    NoDevice(String),

    #[error("USB error: {0}")]
    Usb(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusb::Error> for BackendError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Access => BackendError::PermissionDenied(e.to_string()),
            rusb::Error::Busy => BackendError::Busy(e.to_string()),
            rusb::Error::NoDevice | rusb::Error::NotFound => BackendError::NoDevice(e.to_string()),
            _ => BackendError::Usb(e.to_string()),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => BackendError::PermissionDenied(e.to_string()),
            std::io::ErrorKind::NotFound => BackendError::NoDevice(e.to_string()),
            _ => BackendError::Io(e.to_string()),
        }
    }
}

/// Device enumeration, authorization and exclusive capture
///
/// `Service` is a matched physical device; `Capture` is the exclusive hold on
/// it. Capture and reset are always invoked on the assertion's own serial
/// context, so both handle types must be `Send`.
pub trait UsbBackend: Send + Sync + 'static {
    type Service: Send + 'static;
    type Capture: Send + 'static;

    /// Find the first device whose VID/PID equal `id`
    fn match_service(&self, id: DeviceIdentifier) -> Option<Self::Service>;

    /// Ask the host to authorize exclusive use of a matched device
    fn authorize(&self, service: &Self::Service) -> Result<(), BackendError>;

    /// Open the device so nothing else can claim it
    fn capture_exclusive(&self, service: &Self::Service) -> Result<Self::Capture, BackendError>;

    /// Reset a captured device before it is handed back
    fn reset(&self, capture: &mut Self::Capture) -> Result<(), BackendError>;

    /// Drop the exclusive hold
    fn release_capture(&self, capture: Self::Capture) -> Result<(), BackendError>;

    /// Drop the reference to the matched device
    fn release_service(&self, service: Self::Service);
}
