use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::distance::EARTH_RADIUS_M;
use crate::error::PositionError;
use crate::live_status::current_timestamp;
use crate::types::{Coordinate, PositionSample};

/// Anything that can produce location fixes on demand.
///
/// `Err(PositionError::Closed)` ends the stream; other errors are transient.
pub trait PositionSource: Send {
    fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>>;
}

impl<S: PositionSource + ?Sized> PositionSource for Box<S> {
    fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>> {
        (**self).next_fix()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Fix(PositionSample),
    Error(PositionError),
}

/// Cadence and freshness policy for a watch
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Minimum time between fix requests
    pub interval: Duration,
    /// Give up on a single fix request after this long
    pub timeout: Duration,
    /// Fixes older than this are discarded
    pub maximum_age: Duration,
    pub channel_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
            maximum_age: Duration::from_secs(5),
            channel_capacity: 100,
        }
    }
}

/// A running subscription to a position source.
///
/// The polling task is aborted when the watch is stopped or dropped, so no
/// fix is delivered after the owner is gone.
pub struct PositionWatch {
    rx: mpsc::Receiver<PositionEvent>,
    handle: JoinHandle<()>,
}

impl PositionWatch {
    pub fn start<S>(source: S, options: WatchOptions) -> Self
    where
        S: PositionSource + 'static,
    {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let handle = tokio::spawn(watch_loop(source, options, tx));
        Self { rx, handle }
    }

    /// Next event, or `None` once the source has closed
    pub async fn next(&mut self) -> Option<PositionEvent> {
        self.rx.recv().await
    }

    pub fn stop(self) {
        log::debug!("Clearing position watch");
    }
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn watch_loop<S: PositionSource>(
    mut source: S,
    options: WatchOptions,
    tx: mpsc::Sender<PositionEvent>,
) {
    let mut ticker = interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_age = options.maximum_age.as_secs_f64();
    let mut fix_count = 0u64;

    loop {
        ticker.tick().await;

        let event = match tokio::time::timeout(options.timeout, source.next_fix()).await {
            Ok(Ok(fix)) => {
                let age = fix.age_secs(current_timestamp());
                if age > max_age {
                    log::debug!("Discarding stale fix ({:.1}s old)", age);
                    continue;
                }
                PositionEvent::Fix(fix)
            }
            Ok(Err(PositionError::Closed)) => {
                log::info!("Position source closed after {} fixes", fix_count);
                break;
            }
            Ok(Err(e)) => PositionEvent::Error(e),
            Err(_) => PositionEvent::Error(PositionError::Timeout),
        };

        let is_fix = matches!(event, PositionEvent::Fix(_));
        match tx.try_send(event) {
            Ok(_) => {
                if is_fix {
                    fix_count += 1;
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Position channel closed after {} fixes", fix_count);
                break;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Consumer is behind, drop this one
            }
        }
    }
}

/// One-shot fix used to pin the home location
pub async fn acquire_home<S>(source: &mut S, timeout: Duration) -> Result<PositionSample, PositionError>
where
    S: PositionSource + ?Sized,
{
    tokio::time::timeout(timeout, source.next_fix())
        .await
        .map_err(|_| PositionError::Timeout)?
}

/// Reads fixes from Termux:API (`termux-location`)
pub struct TermuxLocationSource {
    provider: String,
}

impl TermuxLocationSource {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
        }
    }

    async fn read_fix(&self) -> Result<PositionSample, PositionError> {
        let output = Command::new("termux-location")
            .arg("-p")
            .arg(&self.provider)
            .arg("-r")
            .arg("once")
            .output()
            .await
            .map_err(|e| PositionError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PositionError::Unavailable(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_termux_location(&text, current_timestamp())
    }
}

impl Default for TermuxLocationSource {
    fn default() -> Self {
        Self::new("gps")
    }
}

impl PositionSource for TermuxLocationSource {
    fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>> {
        self.read_fix().boxed()
    }
}

#[derive(Deserialize)]
struct TermuxFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: f64,
    #[serde(rename = "elapsedMs", default)]
    elapsed_ms: Option<f64>,
}

/// Parse `termux-location` JSON output. `now` is unix seconds.
pub fn parse_termux_location(text: &str, now: f64) -> Result<PositionSample, PositionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PositionError::Unavailable("no fix returned".to_string()));
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| PositionError::Parse(e.to_string()))?;

    for key in ["API_ERROR", "error"] {
        if let Some(msg) = value.get(key) {
            let msg = msg.as_str().map(str::to_string).unwrap_or_else(|| msg.to_string());
            if msg.to_lowercase().contains("permission") {
                return Err(PositionError::PermissionDenied);
            }
            return Err(PositionError::Unavailable(msg));
        }
    }

    let fix: TermuxFix =
        serde_json::from_value(value).map_err(|e| PositionError::Parse(e.to_string()))?;
    let age = fix.elapsed_ms.unwrap_or(0.0).max(0.0) / 1000.0;

    Ok(PositionSample {
        timestamp: now - age,
        latitude: fix.latitude,
        longitude: fix.longitude,
        accuracy: fix.accuracy,
    })
}

/// Plays back recorded fixes, restamped as if they were fresh
pub struct ReplaySource {
    samples: VecDeque<PositionSample>,
}

impl ReplaySource {
    pub fn new(samples: Vec<PositionSample>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// Load a JSON array of `{latitude, longitude, accuracy}` objects
    pub fn from_json(json: &str) -> Result<Self, PositionError> {
        let samples: Vec<PositionSample> =
            serde_json::from_str(json).map_err(|e| PositionError::Parse(e.to_string()))?;
        Ok(Self::new(samples))
    }

    pub fn from_file(path: &Path) -> Result<Self, PositionError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| PositionError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl PositionSource for ReplaySource {
    fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>> {
        let next = self.samples.pop_front().map(|mut s| {
            s.timestamp = current_timestamp();
            s
        });
        async move { next.ok_or(PositionError::Closed) }.boxed()
    }
}

const MAX_WALK_LEGS: u64 = 1 << 32;

/// Deterministic walk due north of an origin, out to a turning point and back
pub struct SimulatedWalk {
    origin: Coordinate,
    step_m: f64,
    max_excursion_m: f64,
    step: u64,
}

impl SimulatedWalk {
    pub fn new(origin: Coordinate, step_m: f64, max_excursion_m: f64) -> Self {
        Self {
            origin,
            step_m: step_m.abs().max(0.1),
            max_excursion_m: max_excursion_m.abs(),
            step: 0,
        }
    }

    /// Distance from the origin at step `k` (triangle wave)
    fn offset_m(&self, k: u64) -> f64 {
        let legs = (self.max_excursion_m / self.step_m)
            .ceil()
            .max(1.0)
            .min(MAX_WALK_LEGS as f64) as u64;
        let phase = k % (2 * legs);
        let n = if phase <= legs { phase } else { 2 * legs - phase };
        (n as f64 * self.step_m).min(self.max_excursion_m)
    }
}

impl PositionSource for SimulatedWalk {
    fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>> {
        let offset = self.offset_m(self.step);
        self.step += 1;

        let d_lat = (offset / EARTH_RADIUS_M).to_degrees();
        let sample = PositionSample {
            timestamp: current_timestamp(),
            latitude: (self.origin.latitude() + d_lat).min(90.0),
            longitude: self.origin.longitude(),
            accuracy: 5.0,
        };
        async move { Ok(sample) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::distance;

    fn fast_options() -> WatchOptions {
        WatchOptions {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            maximum_age: Duration::from_secs(5),
            channel_capacity: 16,
        }
    }

    /// Yields fixed timestamps so staleness can be exercised
    struct FixedSource {
        fixes: VecDeque<Result<PositionSample, PositionError>>,
    }

    impl PositionSource for FixedSource {
        fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>> {
            let next = self.fixes.pop_front().unwrap_or(Err(PositionError::Closed));
            async move { next }.boxed()
        }
    }

    /// Never answers
    struct HangingSource;

    impl PositionSource for HangingSource {
        fn next_fix(&mut self) -> BoxFuture<'_, Result<PositionSample, PositionError>> {
            futures::future::pending::<Result<PositionSample, PositionError>>().boxed()
        }
    }

    fn fix_at(timestamp: f64, latitude: f64) -> PositionSample {
        PositionSample {
            timestamp,
            latitude,
            longitude: 0.0,
            accuracy: 3.0,
        }
    }

    #[test]
    fn test_parse_termux_fix() {
        let text = r#"{
          "latitude": 37.7749,
          "longitude": -122.4194,
          "altitude": 12.0,
          "accuracy": 6.5,
          "bearing": 0.0,
          "speed": 0.0,
          "elapsedMs": 1500,
          "provider": "gps"
        }"#;
        let fix = parse_termux_location(text, 1000.0).unwrap();
        assert_eq!(fix.latitude, 37.7749);
        assert_eq!(fix.accuracy, 6.5);
        assert_eq!(fix.timestamp, 998.5);
    }

    #[test]
    fn test_parse_termux_errors() {
        assert_eq!(
            parse_termux_location(r#"{"API_ERROR": "Location permission not granted"}"#, 0.0),
            Err(PositionError::PermissionDenied)
        );
        assert!(matches!(
            parse_termux_location("", 0.0),
            Err(PositionError::Unavailable(_))
        ));
        assert!(matches!(
            parse_termux_location("not json", 0.0),
            Err(PositionError::Parse(_))
        ));
        assert!(matches!(
            parse_termux_location(r#"{"error": "GPS disabled"}"#, 0.0),
            Err(PositionError::Unavailable(_))
        ));
    }

    #[test]
    fn test_replay_from_json() {
        let json = r#"[
            {"latitude": 1.0, "longitude": 2.0, "accuracy": 4.0},
            {"latitude": 1.1, "longitude": 2.1, "accuracy": 4.0}
        ]"#;
        let replay = ReplaySource::from_json(json).unwrap();
        assert_eq!(replay.remaining(), 2);
        assert!(ReplaySource::from_json("{").is_err());
    }

    #[test]
    fn test_simulated_walk_turns_around() {
        let origin = Coordinate::new(10.0, 20.0).unwrap();
        let walk = SimulatedWalk::new(origin, 50.0, 200.0);
        let offsets: Vec<f64> = (0..10).map(|k| walk.offset_m(k)).collect();
        assert_eq!(
            offsets,
            vec![0.0, 50.0, 100.0, 150.0, 200.0, 150.0, 100.0, 50.0, 0.0, 50.0]
        );
    }

    #[test]
    fn test_simulated_walk_huge_excursion() {
        let origin = Coordinate::new(10.0, 20.0).unwrap();
        let walk = SimulatedWalk::new(origin, 0.1, f64::MAX);
        approx::assert_relative_eq!(walk.offset_m(1), 0.1);
        approx::assert_relative_eq!(walk.offset_m(u64::MAX), 0.1);
        assert!(walk.offset_m(1 << 40).is_finite());

        let nan = SimulatedWalk::new(origin, 10.0, f64::NAN);
        assert_eq!(nan.offset_m(3), 10.0);
    }

    #[tokio::test]
    async fn test_simulated_walk_distances() {
        let origin = Coordinate::new(10.0, 20.0).unwrap();
        let mut walk = SimulatedWalk::new(origin, 50.0, 200.0);
        walk.next_fix().await.unwrap();
        let second = walk.next_fix().await.unwrap();
        let d = distance(origin, second.coordinate().unwrap());
        assert!((d - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_watch_delivers_in_order_then_closes() {
        let samples = vec![fix_at(0.0, 1.0), fix_at(0.0, 2.0), fix_at(0.0, 3.0)];
        let mut watch = PositionWatch::start(ReplaySource::new(samples), fast_options());

        let mut lats = Vec::new();
        while let Some(event) = watch.next().await {
            match event {
                PositionEvent::Fix(s) => lats.push(s.latitude),
                PositionEvent::Error(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_watch_discards_stale_and_surfaces_errors() {
        let now = current_timestamp();
        let source = FixedSource {
            fixes: VecDeque::from(vec![
                Ok(fix_at(now - 60.0, 1.0)),
                Err(PositionError::PermissionDenied),
                Ok(fix_at(now, 2.0)),
            ]),
        };
        let mut watch = PositionWatch::start(source, fast_options());

        assert_eq!(
            watch.next().await,
            Some(PositionEvent::Error(PositionError::PermissionDenied))
        );
        match watch.next().await {
            Some(PositionEvent::Fix(s)) => assert_eq!(s.latitude, 2.0),
            other => panic!("expected fresh fix, got {:?}", other),
        }
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn test_watch_timeout() {
        let mut watch = PositionWatch::start(HangingSource, fast_options());
        assert_eq!(
            watch.next().await,
            Some(PositionEvent::Error(PositionError::Timeout))
        );
        watch.stop();
    }

    #[tokio::test]
    async fn test_acquire_home() {
        let mut replay = ReplaySource::new(vec![fix_at(0.0, 45.0)]);
        let home = acquire_home(&mut replay, Duration::from_secs(1)).await.unwrap();
        assert_eq!(home.latitude, 45.0);
        assert_eq!(
            acquire_home(&mut replay, Duration::from_secs(1)).await,
            Err(PositionError::Closed)
        );
        assert_eq!(
            acquire_home(&mut HangingSource, Duration::from_millis(20)).await,
            Err(PositionError::Timeout)
        );
    }
}
