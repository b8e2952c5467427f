//! Process-wide registry of held devices
//!
//! The registry turns the process argument list into a set of
//! [`ExclusiveAccessAssertion`]s exactly once and keeps them alive until
//! [`AssertionRegistry::shutdown`] or until the registry is dropped.

use crate::config::CaptureSettings;
use crate::device_spec::parse_arguments;
use crate::usb::{
    AcquireError, BackendError, ExclusiveAccessAssertion, RusbBackend, UsbBackend,
};
use common::DeviceIdentifier;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, warn};

/// One-shot initialization gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    NotRun,
    Running,
    Done,
}

struct Inner<B: UsbBackend> {
    gate: Gate,
    assertions: Vec<ExclusiveAccessAssertion<B>>,
    /// Set by `shutdown`; devices acquired afterwards are released at once
    shut_down: bool,
}

/// Owner of every live assertion
pub struct AssertionRegistry<B: UsbBackend> {
    backend: Arc<B>,
    settings: CaptureSettings,
    inner: Mutex<Inner<B>>,
}

impl<B: UsbBackend> AssertionRegistry<B> {
    pub fn new(backend: Arc<B>, settings: CaptureSettings) -> Self {
        Self {
            backend,
            settings,
            inner: Mutex::new(Inner {
                gate: Gate::NotRun,
                assertions: Vec::new(),
                shut_down: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        // A panic while holding the lock leaves the data consistent enough to release
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire every device named on this process's command line
    ///
    /// Only the first call does anything; see [`Self::ensure_acquired_from`].
    pub fn ensure_acquired(&self) -> bool {
        self.ensure_acquired_from(std::env::args())
    }

    /// Acquire every device named in `args`, once per registry
    ///
    /// Returns true if this call performed the acquisition. Concurrent and
    /// later callers return false immediately.
    pub fn ensure_acquired_from<I, S>(&self, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut inner = self.lock();
            if inner.gate != Gate::NotRun {
                debug!("Device acquisition already {:?}", inner.gate);
                return false;
            }
            if inner.shut_down {
                debug!("Registry shut down before acquisition, not acquiring");
                inner.gate = Gate::Done;
                return false;
            }
            inner.gate = Gate::Running;
        }

        let ids = parse_arguments(args);
        info!("Acquiring {} requested device(s)", ids.len());

        let assertions = self.acquire_all(&ids);

        let mut inner = self.lock();
        inner.gate = Gate::Done;

        if inner.shut_down {
            drop(inner);
            warn!(
                "Shutdown requested during acquisition, releasing {} device(s)",
                assertions.len()
            );
            drop(assertions);
            return true;
        }

        inner.assertions.extend(assertions);

        let captured = inner.assertions.iter().filter(|a| a.is_captured()).count();
        info!(
            "Device acquisition done: {} held, {} captured, {} requested",
            inner.assertions.len(),
            captured,
            ids.len()
        );

        true
    }

    fn acquire_all(&self, ids: &[DeviceIdentifier]) -> Vec<ExclusiveAccessAssertion<B>> {
        let results: Vec<_> = if self.settings.parallel_acquire && ids.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = ids
                    .iter()
                    .map(|&id| scope.spawn(move || self.acquire_one(id)))
                    .collect();

                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|_| None))
                    .collect()
            })
        } else {
            ids.iter().map(|&id| self.acquire_one(id)).collect()
        };

        results.into_iter().flatten().collect()
    }

    fn acquire_one(&self, id: DeviceIdentifier) -> Option<ExclusiveAccessAssertion<B>> {
        match ExclusiveAccessAssertion::acquire(&self.backend, id, &self.settings) {
            Ok(assertion) => Some(assertion),
            Err(AcquireError::NotFound(id)) => {
                warn!("No connected device matches {}, skipping", id);
                None
            }
            Err(e) => {
                warn!("Skipping device {}: {}", id, e);
                None
            }
        }
    }

    pub fn gate(&self) -> Gate {
        self.lock().gate
    }

    /// Number of live assertions
    pub fn len(&self) -> usize {
        self.lock().assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of the live assertions, in acquisition order
    pub fn held_devices(&self) -> Vec<DeviceIdentifier> {
        self.lock()
            .assertions
            .iter()
            .map(|a| a.device_id())
            .collect()
    }

    /// Release every held device, in acquisition order
    ///
    /// Devices are never acquired afterwards. If an acquisition is still
    /// running, its devices are released as soon as it finishes. Returns the
    /// number of assertions released by this call.
    pub fn shutdown(&self) -> usize {
        let assertions = {
            let mut inner = self.lock();
            inner.shut_down = true;
            std::mem::take(&mut inner.assertions)
        };
        let count = assertions.len();

        // Released outside the lock; Vec drops front to back
        drop(assertions);

        if count > 0 {
            info!("Released {} held device(s)", count);
        }
        count
    }
}

static GLOBAL: OnceLock<AssertionRegistry<RusbBackend>> = OnceLock::new();

/// Process-wide registry backed by libusb
///
/// The first call creates the backend with `settings`; later calls return the
/// same registry and ignore their argument. Statics are never dropped, so
/// call [`AssertionRegistry::shutdown`] before exiting.
pub fn global(
    settings: &CaptureSettings,
) -> Result<&'static AssertionRegistry<RusbBackend>, BackendError> {
    if let Some(registry) = GLOBAL.get() {
        return Ok(registry);
    }

    let backend = Arc::new(RusbBackend::new(settings)?);
    Ok(GLOBAL.get_or_init(|| AssertionRegistry::new(backend, settings.clone())))
}
