//! Location capture - one fresh geotagged reading per submission
//!
//! Device positioning APIs report through callbacks. [`LocationCapture`] turns
//! a single request into one awaitable result and enforces its own timeout, so
//! behaviour does not depend on how a platform implements its timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::{LocationConfig, LocationSourceKind};
use crate::error::LocationError;
use crate::record::GeoFix;

/// Clock skew tolerated between the request and the fix timestamp, in seconds
const FRESHNESS_SKEW_SECS: i64 = 2;

/// Options passed to the positioning source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    /// Oldest cached position the source may return. Always zero here.
    pub maximum_age: Duration,
    pub timeout: Duration,
}

/// One-shot reply for a fix request
pub type FixCallback = Box<dyn FnOnce(Result<GeoFix, LocationError>) + Send + 'static>;

/// Device positioning capability.
///
/// Implementations call `reply` at most once. Dropping it without a call is
/// treated as `PositionUnavailable`. `request_fix` runs on the blocking pool,
/// so a source may wait inside it; the capture timeout still applies.
pub trait PositionSource: Send + Sync {
    fn request_fix(&self, options: &FixOptions, reply: FixCallback);
}

/// A surveyed, fixed coordinate (kiosk collection points, devices without GPS)
#[derive(Debug, Clone, Copy)]
pub struct FixedPositionSource {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
}

impl PositionSource for FixedPositionSource {
    fn request_fix(&self, _options: &FixOptions, reply: FixCallback) {
        reply(Ok(GeoFix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_meters: self.accuracy_meters,
            captured_at: Utc::now(),
        }));
    }
}

/// Wraps a [`PositionSource`] as a single async call
#[derive(Clone)]
pub struct LocationCapture {
    source: Option<Arc<dyn PositionSource>>,
    timeout: Duration,
}

impl LocationCapture {
    pub fn new(source: Arc<dyn PositionSource>, timeout: Duration) -> Self {
        Self {
            source: Some(source),
            timeout,
        }
    }

    /// No positioning capability on this device
    pub fn unsupported() -> Self {
        Self {
            source: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn from_config(config: &LocationConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        match config.source {
            LocationSourceKind::None => Self::unsupported(),
            LocationSourceKind::Fixed => Self::new(
                Arc::new(FixedPositionSource {
                    latitude: config.latitude,
                    longitude: config.longitude,
                    accuracy_meters: config.accuracy_meters,
                }),
                timeout,
            ),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request one fresh high-accuracy fix.
    ///
    /// Resolves exactly once. Never retries. Dropping the future abandons the
    /// request without side effects; a late reply from the source is discarded.
    pub async fn capture_location(&self) -> Result<GeoFix, LocationError> {
        let Some(source) = &self.source else {
            return Err(LocationError::Unsupported);
        };

        let requested_at = Utc::now();
        let options = FixOptions {
            high_accuracy: true,
            maximum_age: Duration::ZERO,
            timeout: self.timeout,
        };

        let (tx, rx) = oneshot::channel();
        let source = Arc::clone(source);
        // Detached: a source stuck inside request_fix cannot hold up the timeout
        tokio::task::spawn_blocking(move || {
            source.request_fix(
                &options,
                Box::new(move |result| {
                    // Receiver is gone if we already timed out or were cancelled
                    let _ = tx.send(result);
                }),
            );
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(fix))) => check_fix(fix, requested_at),
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "Position source reported failure");
                Err(e)
            }
            Ok(Err(_)) => {
                warn!("Position source dropped the request without replying");
                Err(LocationError::PositionUnavailable)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "No location fix before timeout");
                Err(LocationError::Timeout(self.timeout))
            }
        }
    }
}

fn check_fix(fix: GeoFix, requested_at: DateTime<Utc>) -> Result<GeoFix, LocationError> {
    if !fix.is_plausible() {
        warn!(
            latitude = fix.latitude,
            longitude = fix.longitude,
            accuracy = fix.accuracy_meters,
            "Discarding implausible fix"
        );
        return Err(LocationError::PositionUnavailable);
    }
    if fix.captured_at + chrono::Duration::seconds(FRESHNESS_SKEW_SECS) < requested_at {
        warn!(captured_at = %fix.captured_at, "Discarding cached fix");
        return Err(LocationError::PositionUnavailable);
    }
    debug!(accuracy = fix.accuracy_meters, "Location fix captured");
    Ok(fix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Holds callbacks forever, like a GPS that never locks
    #[derive(Default)]
    struct SilentSource {
        held: Mutex<Vec<FixCallback>>,
    }

    impl PositionSource for SilentSource {
        fn request_fix(&self, _options: &FixOptions, reply: FixCallback) {
            self.held.lock().unwrap().push(reply);
        }
    }

    struct DroppingSource;

    impl PositionSource for DroppingSource {
        fn request_fix(&self, _options: &FixOptions, _reply: FixCallback) {}
    }

    struct FailingSource(LocationError);

    impl PositionSource for FailingSource {
        fn request_fix(&self, _options: &FixOptions, reply: FixCallback) {
            reply(Err(self.0.clone()));
        }
    }

    #[derive(Default)]
    struct StaleSource {
        seen: Mutex<Option<FixOptions>>,
    }

    impl PositionSource for StaleSource {
        fn request_fix(&self, options: &FixOptions, reply: FixCallback) {
            *self.seen.lock().unwrap() = Some(*options);
            reply(Ok(GeoFix {
                latitude: 1.0,
                longitude: 1.0,
                accuracy_meters: 5.0,
                captured_at: Utc::now() - chrono::Duration::minutes(10),
            }));
        }
    }

    #[tokio::test]
    async fn test_fixed_source_returns_fix() {
        let capture = LocationCapture::new(
            Arc::new(FixedPositionSource {
                latitude: 0.3476,
                longitude: 32.5825,
                accuracy_meters: 12.0,
            }),
            Duration::from_secs(10),
        );
        let fix = capture.capture_location().await.unwrap();
        assert_eq!(fix.latitude, 0.3476);
        assert_eq!(fix.accuracy_meters, 12.0);
    }

    #[tokio::test]
    async fn test_timeout_when_source_never_replies() {
        let capture = LocationCapture::new(
            Arc::new(SilentSource::default()),
            Duration::from_millis(50),
        );
        let result = capture.capture_location().await;
        assert_eq!(result, Err(LocationError::Timeout(Duration::from_millis(50))));
    }

    /// Waits inside request_fix before replying
    struct BlockingSource(Duration);

    impl PositionSource for BlockingSource {
        fn request_fix(&self, _options: &FixOptions, reply: FixCallback) {
            std::thread::sleep(self.0);
            reply(Ok(GeoFix {
                latitude: 1.0,
                longitude: 1.0,
                accuracy_meters: 5.0,
                captured_at: Utc::now(),
            }));
        }
    }

    #[tokio::test]
    async fn test_timeout_bounds_a_blocking_source() {
        let capture = LocationCapture::new(
            Arc::new(BlockingSource(Duration::from_millis(500))),
            Duration::from_millis(50),
        );
        let started = std::time::Instant::now();
        let result = capture.capture_location().await;
        assert_eq!(result, Err(LocationError::Timeout(Duration::from_millis(50))));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_timeout_reports_sub_second_window() {
        let err = LocationError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "No location fix within 250ms");
    }

    #[tokio::test]
    async fn test_dropped_callback_is_unavailable() {
        let capture = LocationCapture::new(Arc::new(DroppingSource), Duration::from_secs(1));
        assert_eq!(
            capture.capture_location().await,
            Err(LocationError::PositionUnavailable)
        );
    }

    #[tokio::test]
    async fn test_source_failure_passes_through() {
        let capture = LocationCapture::new(
            Arc::new(FailingSource(LocationError::PermissionDenied)),
            Duration::from_secs(1),
        );
        assert_eq!(
            capture.capture_location().await,
            Err(LocationError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn test_unsupported_without_source() {
        let capture = LocationCapture::unsupported();
        assert_eq!(
            capture.capture_location().await,
            Err(LocationError::Unsupported)
        );
    }

    #[tokio::test]
    async fn test_stale_fix_rejected() {
        let source = Arc::new(StaleSource::default());
        let capture = LocationCapture::new(source.clone(), Duration::from_secs(1));
        assert_eq!(
            capture.capture_location().await,
            Err(LocationError::PositionUnavailable)
        );

        let options = source.seen.lock().unwrap().expect("source was asked for a fix");
        assert_eq!(options.maximum_age, Duration::ZERO);
        assert!(options.high_accuracy);
    }

    #[tokio::test]
    async fn test_implausible_fix_rejected() {
        let capture = LocationCapture::new(
            Arc::new(FixedPositionSource {
                latitude: 123.0,
                longitude: 0.0,
                accuracy_meters: 5.0,
            }),
            Duration::from_secs(1),
        );
        assert_eq!(
            capture.capture_location().await,
            Err(LocationError::PositionUnavailable)
        );
    }
}
