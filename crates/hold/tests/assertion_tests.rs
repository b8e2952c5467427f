//! Integration tests for the exclusive access assertion lifecycle
//!
//! Tests the per-device state machine against a recording mock backend:
//! - Match, authorize and capture ordering
//! - Tolerated authorization failures
//! - Strict and degraded capture failure handling
//! - Reset-then-release on drop

use common::DeviceIdentifier;
use hold::test_utils::{BackendCall, MockBackend};
use hold::{AcquireError, AssertionState, CaptureSettings, ExclusiveAccessAssertion};
use std::sync::Arc;

const KEYBOARD: DeviceIdentifier = DeviceIdentifier::new(0x0b05, 0x17cb);
const DONGLE: DeviceIdentifier = DeviceIdentifier::new(0x3151, 0x4015);

fn lenient() -> CaptureSettings {
    CaptureSettings {
        strict: false,
        ..CaptureSettings::default()
    }
}

mod acquire {
    use super::*;

    #[test]
    fn test_acquire_runs_match_authorize_capture_in_order() {
        let backend = Arc::new(MockBackend::new().with_device(KEYBOARD));

        let assertion =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default())
                .expect("device should be acquired");

        assert_eq!(assertion.device_id(), KEYBOARD);
        assert_eq!(assertion.state(), AssertionState::Captured);
        assert!(assertion.is_captured());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Match(KEYBOARD),
                BackendCall::Authorize(KEYBOARD),
                BackendCall::Capture(KEYBOARD),
            ]
        );
    }

    #[test]
    fn test_no_matching_device_yields_not_found() {
        let backend = Arc::new(MockBackend::new().with_device(DONGLE));

        let result =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default());

        let err = result.expect_err("no device should match");
        assert!(err.is_not_found());
        assert!(matches!(err, AcquireError::NotFound(id) if id == KEYBOARD));
        // Nothing beyond the match was attempted
        assert_eq!(backend.calls(), vec![BackendCall::Match(KEYBOARD)]);
    }

    #[test]
    fn test_first_match_is_used() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(DONGLE)
                .with_device(KEYBOARD)
                .with_device(KEYBOARD),
        );

        let _assertion =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default())
                .unwrap();

        assert_eq!(backend.captured_slots(), vec![1]);
    }

    #[test]
    fn test_authorization_failure_is_not_fatal() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .failing_authorize(KEYBOARD),
        );

        let assertion =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default())
                .expect("capture should still be attempted");

        assert!(assertion.is_captured());
        assert_eq!(backend.count(|c| *c == BackendCall::Capture(KEYBOARD)), 1);
    }

    #[test]
    fn test_capture_runs_on_dedicated_context() {
        let backend = Arc::new(MockBackend::new().with_device(KEYBOARD));

        let _assertion =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default())
                .unwrap();

        let threads = backend.capture_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].as_deref(), Some("usb-hold-0b05:17cb"));
        assert_ne!(
            threads[0].as_deref(),
            std::thread::current().name(),
            "capture must not run on the caller thread"
        );
    }
}

mod capture_failure {
    use super::*;

    #[test]
    fn test_strict_capture_failure_discards_and_releases_service() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .failing_capture(KEYBOARD),
        );

        let result =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default());

        assert!(matches!(
            result,
            Err(AcquireError::CaptureFailed { id, .. }) if id == KEYBOARD
        ));
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Match(KEYBOARD),
                BackendCall::Authorize(KEYBOARD),
                BackendCall::Capture(KEYBOARD),
                BackendCall::ReleaseService(KEYBOARD),
            ]
        );
    }

    #[test]
    fn test_lenient_capture_failure_keeps_degraded_record() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .failing_capture(KEYBOARD),
        );

        let assertion = ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &lenient())
            .expect("degraded record should be kept");

        assert!(!assertion.is_captured());
        assert_eq!(assertion.state(), AssertionState::Authorized);

        drop(assertion);

        // No capture means no reset, only the service is released
        assert_eq!(backend.count(|c| matches!(c, BackendCall::Reset(_))), 0);
        assert_eq!(
            backend.count(|c| matches!(c, BackendCall::ReleaseCapture(_))),
            0
        );
        assert_eq!(
            backend.count(|c| *c == BackendCall::ReleaseService(KEYBOARD)),
            1
        );
    }

    #[test]
    fn test_panicking_capture_still_releases_service() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .panicking_capture(KEYBOARD),
        );

        let result =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default());

        assert!(matches!(
            result,
            Err(AcquireError::CaptureFailed { id, .. }) if id == KEYBOARD
        ));
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Match(KEYBOARD),
                BackendCall::Authorize(KEYBOARD),
                BackendCall::Capture(KEYBOARD),
                BackendCall::ReleaseService(KEYBOARD),
            ]
        );
    }

    #[test]
    fn test_panicking_capture_lenient_keeps_releasable_record() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .panicking_capture(KEYBOARD),
        );

        let assertion = ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &lenient())
            .expect("degraded record should be kept");
        assert!(!assertion.is_captured());

        drop(assertion);
        assert_eq!(
            backend.count(|c| *c == BackendCall::ReleaseService(KEYBOARD)),
            1
        );
    }

    #[test]
    fn test_degraded_record_after_failed_authorization_stays_matched() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .failing_authorize(KEYBOARD)
                .failing_capture(KEYBOARD),
        );

        let assertion = ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &lenient()).unwrap();
        assert_eq!(assertion.state(), AssertionState::Matched);
    }
}

mod release {
    use super::*;

    #[test]
    fn test_drop_resets_then_releases_exactly_once() {
        let backend = Arc::new(MockBackend::new().with_device(KEYBOARD));

        let assertion =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default())
                .unwrap();
        drop(assertion);

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Match(KEYBOARD),
                BackendCall::Authorize(KEYBOARD),
                BackendCall::Capture(KEYBOARD),
                BackendCall::Reset(KEYBOARD),
                BackendCall::ReleaseCapture(KEYBOARD),
                BackendCall::ReleaseService(KEYBOARD),
            ]
        );
    }

    #[test]
    fn test_reset_failure_still_releases() {
        let backend = Arc::new(
            MockBackend::new()
                .with_device(KEYBOARD)
                .failing_reset(KEYBOARD),
        );

        let assertion =
            ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &CaptureSettings::default())
                .unwrap();
        drop(assertion);

        let tail: Vec<_> = backend.calls().into_iter().skip(3).collect();
        assert_eq!(
            tail,
            vec![
                BackendCall::Reset(KEYBOARD),
                BackendCall::ReleaseCapture(KEYBOARD),
                BackendCall::ReleaseService(KEYBOARD),
            ]
        );
    }

    #[test]
    fn test_reset_skipped_when_disabled() {
        let backend = Arc::new(MockBackend::new().with_device(KEYBOARD));
        let settings = CaptureSettings {
            reset_on_release: false,
            ..CaptureSettings::default()
        };

        let assertion = ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &settings).unwrap();
        drop(assertion);

        assert_eq!(backend.count(|c| matches!(c, BackendCall::Reset(_))), 0);
        assert_eq!(
            backend.count(|c| *c == BackendCall::ReleaseCapture(KEYBOARD)),
            1
        );
    }

    #[test]
    fn test_independent_assertions_release_independently() {
        let backend = Arc::new(MockBackend::new().with_device(KEYBOARD).with_device(DONGLE));
        let settings = CaptureSettings::default();

        let keyboard = ExclusiveAccessAssertion::acquire(&backend, KEYBOARD, &settings).unwrap();
        let dongle = ExclusiveAccessAssertion::acquire(&backend, DONGLE, &settings).unwrap();

        drop(dongle);
        assert_eq!(
            backend.count(|c| *c == BackendCall::ReleaseService(DONGLE)),
            1
        );
        assert_eq!(
            backend.count(|c| *c == BackendCall::ReleaseService(KEYBOARD)),
            0
        );

        drop(keyboard);
        assert_eq!(
            backend.calls_for(KEYBOARD).last(),
            Some(&BackendCall::ReleaseService(KEYBOARD))
        );
    }
}
