//! Exclusive access assertion
//!
//! An [`ExclusiveAccessAssertion`] is the live record of one held device. It
//! is created by [`ExclusiveAccessAssertion::acquire`], which walks the
//! device through match, authorize and capture, and it gives the device back
//! (reset, release capture, release service) exactly once when dropped.

use crate::config::CaptureSettings;
use crate::usb::backend::{BackendError, UsbBackend};
use crate::usb::worker::SerialContext;
use common::DeviceIdentifier;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle of an assertion; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionState {
    /// Device found, authorization failed or was not granted
    Matched,
    /// Device found and authorized
    Authorized,
    /// Device exclusively captured
    Captured,
    /// Device handed back
    Released,
}

/// Why an assertion could not be created
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("no connected device matches {0}")]
    NotFound(DeviceIdentifier),

    #[error("capture of {id} failed: {source}")]
    CaptureFailed {
        id: DeviceIdentifier,
        #[source]
        source: BackendError,
    },

    #[error("serial context for {id} unavailable: {source}")]
    Context {
        id: DeviceIdentifier,
        #[source]
        source: common::Error,
    },
}

impl AcquireError {
    /// Whether this is the ordinary "device not plugged in" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, AcquireError::NotFound(_))
    }
}

/// Live exclusive hold on one physical device
///
/// Invariant: `capture` is only ever `Some` while `service` and `context`
/// are `Some`.
pub struct ExclusiveAccessAssertion<B: UsbBackend> {
    backend: Arc<B>,
    device_id: DeviceIdentifier,
    service: Option<B::Service>,
    capture: Option<B::Capture>,
    context: Option<SerialContext>,
    state: AssertionState,
    reset_on_release: bool,
}

impl<B: UsbBackend> ExclusiveAccessAssertion<B> {
    /// Match, authorize and capture the device named by `id`
    ///
    /// Authorization failures are logged and do not stop the capture attempt.
    /// A capture failure discards the assertion when `settings.strict` is
    /// set; otherwise the assertion is kept without a capture.
    pub fn acquire(
        backend: &Arc<B>,
        id: DeviceIdentifier,
        settings: &CaptureSettings,
    ) -> Result<Self, AcquireError> {
        let service = backend.match_service(id).ok_or(AcquireError::NotFound(id))?;

        let mut state = AssertionState::Matched;
        match backend.authorize(&service) {
            Ok(()) => state = AssertionState::Authorized,
            Err(e) => warn!("Authorization of {} failed, trying capture anyway: {}", id, e),
        }

        let context_name = format!("usb-hold-{:04x}:{:04x}", id.vendor_id, id.product_id);
        let context = match SerialContext::spawn(context_name) {
            Ok(context) => context,
            Err(source) => {
                backend.release_service(service);
                return Err(AcquireError::Context { id, source });
            }
        };

        let capture_backend = backend.clone();
        let (service, captured) = match context.run_sync(move || {
            // A panicking capture must still hand the service back for release
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                capture_backend.capture_exclusive(&service)
            }))
            .unwrap_or_else(|_| Err(BackendError::Usb("capture panicked".to_string())));
            (service, result)
        }) {
            Ok(outcome) => outcome,
            Err(source) => {
                // Only reachable if the context stopped before running the job,
                // which dropped the job and the service with it
                return Err(AcquireError::Context { id, source });
            }
        };

        let mut assertion = Self {
            backend: backend.clone(),
            device_id: id,
            service: Some(service),
            capture: None,
            context: Some(context),
            state,
            reset_on_release: settings.reset_on_release,
        };

        match captured {
            Ok(capture) => {
                assertion.capture = Some(capture);
                assertion.state = AssertionState::Captured;
                info!("Holding device {} exclusively", id);
            }
            Err(source) if settings.strict => {
                warn!("Capture of {} failed, not holding it: {}", id, source);
                // Dropping releases the service and stops the context
                drop(assertion);
                return Err(AcquireError::CaptureFailed { id, source });
            }
            Err(e) => {
                warn!("Capture of {} failed, keeping degraded record: {}", id, e);
            }
        }

        Ok(assertion)
    }

    pub fn device_id(&self) -> DeviceIdentifier {
        self.device_id
    }

    pub fn state(&self) -> AssertionState {
        self.state
    }

    /// Whether the device is actually held exclusively
    pub fn is_captured(&self) -> bool {
        self.capture.is_some()
    }

    /// Reset and release the capture, then release the service
    ///
    /// Runs at most once; failures are logged and swallowed.
    fn release(&mut self) {
        if self.state == AssertionState::Released {
            return;
        }

        if let Some(mut capture) = self.capture.take() {
            let backend = self.backend.clone();
            let reset = self.reset_on_release;
            let id = self.device_id;

            let release = move || -> Result<(), BackendError> {
                if reset && let Err(e) = backend.reset(&mut capture) {
                    warn!("Reset of {} failed: {}", id, e);
                }
                backend.release_capture(capture)
            };

            let outcome = match &self.context {
                Some(context) => context.run_sync(release),
                None => Ok(release()),
            };

            match outcome {
                Ok(Ok(())) => debug!("Released capture of {}", id),
                Ok(Err(e)) => warn!("Releasing capture of {} failed: {}", id, e),
                Err(e) => warn!("Could not run release of {}: {}", id, e),
            }
        }

        // Joins the context thread
        self.context.take();

        if let Some(service) = self.service.take() {
            self.backend.release_service(service);
        }

        self.state = AssertionState::Released;
        info!("Released device {}", self.device_id);
    }
}

impl<B: UsbBackend> Drop for ExclusiveAccessAssertion<B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: UsbBackend> fmt::Debug for ExclusiveAccessAssertion<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveAccessAssertion")
            .field("device_id", &self.device_id)
            .field("state", &self.state)
            .field("captured", &self.capture.is_some())
            .finish()
    }
}
