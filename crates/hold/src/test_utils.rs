//! Test utilities for usb-hold
//!
//! Provides a recording [`MockBackend`] so the hold lifecycle can be tested
//! without real USB hardware.
//!
//! # Example
//!
//! ```
//! use common::DeviceIdentifier;
//! use hold::UsbBackend;
//! use hold::test_utils::{BackendCall, MockBackend};
//!
//! let id = DeviceIdentifier::new(0x1234, 0x5678);
//! let backend = MockBackend::new().with_device(id);
//! assert!(backend.match_service(id).is_some());
//! assert_eq!(backend.calls(), vec![BackendCall::Match(id)]);
//! ```

use crate::usb::{BackendError, UsbBackend};
use common::DeviceIdentifier;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One recorded backend invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCall {
    Match(DeviceIdentifier),
    Authorize(DeviceIdentifier),
    Capture(DeviceIdentifier),
    Reset(DeviceIdentifier),
    ReleaseCapture(DeviceIdentifier),
    ReleaseService(DeviceIdentifier),
}

/// Matched mock device; `slot` is its position in the connected list
#[derive(Debug)]
pub struct MockService {
    pub id: DeviceIdentifier,
    pub slot: usize,
}

/// Captured mock device
#[derive(Debug)]
pub struct MockCapture {
    pub id: DeviceIdentifier,
    pub slot: usize,
    /// Name of the thread the capture ran on
    pub thread: Option<String>,
}

/// Backend that serves a fixed device list and records every call
#[derive(Debug, Default)]
pub struct MockBackend {
    devices: Vec<DeviceIdentifier>,
    fail_authorize: HashSet<DeviceIdentifier>,
    fail_capture: HashSet<DeviceIdentifier>,
    fail_reset: HashSet<DeviceIdentifier>,
    panic_capture: HashSet<DeviceIdentifier>,
    capture_delay: Option<Duration>,
    calls: Mutex<Vec<BackendCall>>,
    capture_slots: Mutex<Vec<usize>>,
    capture_threads: Mutex<Vec<Option<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connected device
    pub fn with_device(mut self, id: DeviceIdentifier) -> Self {
        self.devices.push(id);
        self
    }

    pub fn failing_authorize(mut self, id: DeviceIdentifier) -> Self {
        self.fail_authorize.insert(id);
        self
    }

    pub fn failing_capture(mut self, id: DeviceIdentifier) -> Self {
        self.fail_capture.insert(id);
        self
    }

    pub fn failing_reset(mut self, id: DeviceIdentifier) -> Self {
        self.fail_reset.insert(id);
        self
    }

    /// Make `capture_exclusive` panic for `id`
    pub fn panicking_capture(mut self, id: DeviceIdentifier) -> Self {
        self.panic_capture.insert(id);
        self
    }

    /// Sleep in every `capture_exclusive` call
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = Some(delay);
        self
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    /// Calls concerning one device, in order
    pub fn calls_for(&self, id: DeviceIdentifier) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(|call| call_device(call) == id)
            .collect()
    }

    /// Number of calls matching `pred`
    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    /// Device-list slots captured so far
    pub fn captured_slots(&self) -> Vec<usize> {
        lock(&self.capture_slots).clone()
    }

    /// Thread names capture calls ran on
    pub fn capture_threads(&self) -> Vec<Option<String>> {
        lock(&self.capture_threads).clone()
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }
}

fn call_device(call: &BackendCall) -> DeviceIdentifier {
    match *call {
        BackendCall::Match(id)
        | BackendCall::Authorize(id)
        | BackendCall::Capture(id)
        | BackendCall::Reset(id)
        | BackendCall::ReleaseCapture(id)
        | BackendCall::ReleaseService(id) => id,
    }
}

impl UsbBackend for MockBackend {
    type Service = MockService;
    type Capture = MockCapture;

    fn match_service(&self, id: DeviceIdentifier) -> Option<MockService> {
        self.record(BackendCall::Match(id));
        self.devices
            .iter()
            .position(|d| *d == id)
            .map(|slot| MockService { id, slot })
    }

    fn authorize(&self, service: &MockService) -> Result<(), BackendError> {
        self.record(BackendCall::Authorize(service.id));
        if self.fail_authorize.contains(&service.id) {
            return Err(BackendError::PermissionDenied(format!("{}", service.id)));
        }
        Ok(())
    }

    fn capture_exclusive(&self, service: &MockService) -> Result<MockCapture, BackendError> {
        self.record(BackendCall::Capture(service.id));
        let thread = std::thread::current().name().map(str::to_string);
        lock(&self.capture_threads).push(thread.clone());

        if let Some(delay) = self.capture_delay {
            std::thread::sleep(delay);
        }

        if self.panic_capture.contains(&service.id) {
            panic!("mock capture of {} panicked", service.id);
        }

        if self.fail_capture.contains(&service.id) {
            return Err(BackendError::Busy(format!("{}", service.id)));
        }

        lock(&self.capture_slots).push(service.slot);
        Ok(MockCapture {
            id: service.id,
            slot: service.slot,
            thread,
        })
    }

    fn reset(&self, capture: &mut MockCapture) -> Result<(), BackendError> {
        self.record(BackendCall::Reset(capture.id));
        if self.fail_reset.contains(&capture.id) {
            return Err(BackendError::NoDevice(format!("{}", capture.id)));
        }
        Ok(())
    }

    fn release_capture(&self, capture: MockCapture) -> Result<(), BackendError> {
        self.record(BackendCall::ReleaseCapture(capture.id));
        Ok(())
    }

    fn release_service(&self, service: MockService) {
        self.record(BackendCall::ReleaseService(service.id));
    }
}
