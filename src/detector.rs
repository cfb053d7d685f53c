use serde::{Deserialize, Serialize};

use crate::countdown::AlertCountdown;
use crate::distance::distance;
use crate::error::{GeoResult, GeofenceError};
use crate::types::{Coordinate, GeofenceConfig};

/// Re-entry must come this far inside the radius before a breach clears.
pub const DEFAULT_REENTRY_RATIO: f64 = 0.9;
/// Countdown after an automatic breach alert
pub const DEFAULT_BREACH_COUNTDOWN_SECS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreachState {
    Inside,
    Outside,
}

/// Edge transitions reported by [`BreachDetector::on_sample`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// Inside -> Outside
    Breached,
    /// Outside -> Inside, past the re-entry margin
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCause {
    Breach,
    Manual,
}

/// Returned once per countdown activation, when the alert should go out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTrigger {
    pub cause: AlertCause,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOutcome {
    pub distance_m: f64,
    pub is_outside: bool,
    pub transition: Option<Transition>,
}

/// Tunables for breach handling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorPolicy {
    /// Fraction of the radius a sample must be under to clear a breach
    pub reentry_ratio: f64,
    pub breach_countdown_secs: u32,
}

impl DetectorPolicy {
    pub fn new(reentry_ratio: f64, breach_countdown_secs: u32) -> GeoResult<Self> {
        if !reentry_ratio.is_finite() || reentry_ratio <= 0.0 || reentry_ratio > 1.0 {
            return Err(GeofenceError::InvalidPolicy(format!(
                "reentry ratio {} outside (0, 1]",
                reentry_ratio
            )));
        }
        if breach_countdown_secs == 0 {
            return Err(GeofenceError::InvalidPolicy(
                "breach countdown must be at least 1 second".to_string(),
            ));
        }
        Ok(Self {
            reentry_ratio,
            breach_countdown_secs,
        })
    }
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            reentry_ratio: DEFAULT_REENTRY_RATIO,
            breach_countdown_secs: DEFAULT_BREACH_COUNTDOWN_SECS,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingAlert {
    countdown: AlertCountdown,
    cause: AlertCause,
}

/// Geofence breach detector with re-entry hysteresis.
///
/// A pure reducer: feed it samples and one-second ticks in arrival order and
/// act on what it returns. It never performs I/O.
#[derive(Debug, Clone)]
pub struct BreachDetector {
    config: GeofenceConfig,
    policy: DetectorPolicy,
    state: BreachState,
    pending: Option<PendingAlert>,
}

impl BreachDetector {
    pub fn new(config: GeofenceConfig, policy: DetectorPolicy) -> Self {
        Self {
            config,
            policy,
            state: BreachState::Inside,
            pending: None,
        }
    }

    pub fn config(&self) -> &GeofenceConfig {
        &self.config
    }

    pub fn policy(&self) -> &DetectorPolicy {
        &self.policy
    }

    pub fn state(&self) -> BreachState {
        self.state
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.pending
            .as_ref()
            .and_then(|p| p.countdown.remaining_seconds())
    }

    pub fn pending_cause(&self) -> Option<AlertCause> {
        self.pending
            .as_ref()
            .filter(|p| p.countdown.is_counting())
            .map(|p| p.cause)
    }

    pub fn on_sample(&mut self, loc: Coordinate) -> SampleOutcome {
        let d = distance(self.config.center(), loc);
        let radius = self.config.radius_m();
        let is_outside = d > radius;

        let transition = match self.state {
            BreachState::Inside if is_outside => {
                self.state = BreachState::Outside;
                self.start_countdown(self.policy.breach_countdown_secs, AlertCause::Breach);
                Some(Transition::Breached)
            }
            BreachState::Outside if !is_outside && d < self.policy.reentry_ratio * radius => {
                self.state = BreachState::Inside;
                self.clear_pending();
                Some(Transition::Cleared)
            }
            _ => None,
        };

        SampleOutcome {
            distance_m: d,
            is_outside,
            transition,
        }
    }

    /// Advance the pending countdown by one second
    pub fn tick(&mut self) -> Option<AlertTrigger> {
        let pending = self.pending.as_mut()?;
        if pending.countdown.tick() {
            Some(AlertTrigger {
                cause: pending.cause,
            })
        } else {
            None
        }
    }

    /// Cancel a counting alert. Returns false if nothing was counting.
    pub fn cancel_alert(&mut self) -> bool {
        let canceled = self
            .pending
            .as_mut()
            .is_some_and(|p| p.countdown.cancel());
        if canceled {
            self.pending = None;
        }
        canceled
    }

    /// Manual SOS. A zero delay skips the countdown and triggers now; a
    /// countdown already running is consumed so it cannot fire a second time.
    pub fn trigger_manual(&mut self, delay_secs: u32) -> Option<AlertTrigger> {
        if delay_secs == 0 {
            if let Some(p) = self.pending.as_mut() {
                p.countdown.fire_now();
            }
            return Some(AlertTrigger {
                cause: AlertCause::Manual,
            });
        }
        self.start_countdown(delay_secs, AlertCause::Manual);
        None
    }

    /// Swap the perimeter. Prior breach history no longer applies.
    pub fn replace_config(&mut self, config: GeofenceConfig) {
        self.config = config;
        self.state = BreachState::Inside;
        self.clear_pending();
    }

    fn start_countdown(&mut self, secs: u32, cause: AlertCause) {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.countdown.is_counting())
        {
            return;
        }
        let mut countdown = AlertCountdown::new();
        if countdown.start(secs) {
            self.pending = Some(PendingAlert { countdown, cause });
        }
    }

    fn clear_pending(&mut self) {
        if let Some(p) = self.pending.as_mut() {
            p.countdown.cancel();
        }
        self.pending = None;
    }
}
