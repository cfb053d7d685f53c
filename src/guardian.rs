use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::alert::{AlertPayload, AlertReceipt, AlertSink, UserProfile};
use crate::detector::{
    AlertTrigger, BreachDetector, BreachState, DetectorPolicy, SampleOutcome, Transition,
};
use crate::error::DeliveryError;
use crate::health_monitor::{FixHealth, DEFAULT_FIX_SILENCE_SECS};
use crate::live_status::{current_timestamp, LiveStatus, TrackingStatus};
use crate::position::{PositionEvent, PositionWatch};
use crate::types::{GeofenceConfig, PositionSample};

/// Countdown for a user-initiated SOS
pub const DEFAULT_MANUAL_COUNTDOWN_SECS: u32 = 5;

/// Requests from the user side of a session
#[derive(Debug, Clone, PartialEq)]
pub enum GuardianCommand {
    CancelAlert,
    /// Manual SOS with the configured countdown
    TriggerSos,
    /// Manual SOS, no countdown
    TriggerSosNow,
    SetPerimeter(GeofenceConfig),
    Stop,
}

#[derive(Debug, Clone)]
pub struct GuardianSettings {
    pub profile: UserProfile,
    pub manual_countdown_secs: u32,
    /// Countdown clock period. One second outside of tests.
    pub tick_interval: Duration,
    pub fix_silence: Duration,
    pub status_path: Option<String>,
    pub battery_percent: Option<u8>,
}

impl Default for GuardianSettings {
    fn default() -> Self {
        Self {
            profile: UserProfile::default(),
            manual_countdown_secs: DEFAULT_MANUAL_COUNTDOWN_SECS,
            tick_interval: Duration::from_secs(1),
            fix_silence: Duration::from_secs(DEFAULT_FIX_SILENCE_SECS),
            status_path: None,
            battery_percent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardianReport {
    pub fixes_received: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub final_state: BreachState,
}

/// Runs one tracking session: position events, countdown ticks and user
/// commands are all handled on a single task, in arrival order.
pub struct Guardian<S: AlertSink> {
    detector: BreachDetector,
    sink: S,
    settings: GuardianSettings,
    status: LiveStatus,
    health: FixHealth,
    last_fix: Option<PositionSample>,
}

impl<S: AlertSink> Guardian<S> {
    pub fn new(
        config: GeofenceConfig,
        policy: DetectorPolicy,
        sink: S,
        settings: GuardianSettings,
    ) -> Self {
        let mut status = LiveStatus::new();
        status.tracking_status = TrackingStatus::LocationSet;
        status.battery_percent = settings.battery_percent;

        let mut guardian = Self {
            detector: BreachDetector::new(config, policy),
            sink,
            health: FixHealth::new(settings.fix_silence),
            settings,
            status,
            last_fix: None,
        };
        guardian.refresh_status();
        guardian
    }

    pub fn detector(&self) -> &BreachDetector {
        &self.detector
    }

    pub fn status(&self) -> &LiveStatus {
        &self.status
    }

    pub fn report(&self) -> GuardianReport {
        GuardianReport {
            fixes_received: self.status.fixes_received,
            alerts_sent: self.status.alerts_sent,
            alerts_failed: self.status.alerts_failed,
            final_state: self.detector.state(),
        }
    }

    /// Drive the session until stopped, or until the position stream has
    /// ended and no alert is pending.
    pub async fn run(
        &mut self,
        watch: PositionWatch,
        mut commands: mpsc::Receiver<GuardianCommand>,
    ) -> GuardianReport {
        log::info!(
            "Starting location tracking ({}m radius)",
            self.detector.config().radius_m()
        );
        self.status.tracking_status = TrackingStatus::TrackingActive;

        let mut watch = Some(watch);
        let mut commands_open = true;
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; a countdown second must be a full period
        ticker.tick().await;

        loop {
            if watch.is_none() && self.detector.countdown_remaining().is_none() {
                break;
            }

            let was_counting = self.detector.countdown_remaining().is_some();

            tokio::select! {
                event = next_event(&mut watch) => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => {
                        log::info!("Position stream ended");
                        watch = None;
                    }
                },
                _ = ticker.tick() => {
                    self.handle_tick().await;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => commands_open = false,
                },
            }

            // A new countdown gets full seconds from the moment it is armed
            if !was_counting && self.detector.countdown_remaining().is_some() {
                ticker.reset();
            }
        }

        if let Some(watch) = watch.take() {
            watch.stop();
        }
        self.status.tracking_status = TrackingStatus::Inactive;
        self.refresh_status();
        self.save_status();
        log::info!("Tracking stopped. {}", self.health.format_status());
        self.report()
    }

    pub fn handle_event(&mut self, event: PositionEvent) -> Option<SampleOutcome> {
        let sample = match event {
            PositionEvent::Fix(sample) => sample,
            PositionEvent::Error(e) => {
                log::error!("Location tracking error: {}", e);
                self.status.tracking_status = TrackingStatus::TrackingError;
                self.status.last_error = Some(e.to_string());
                return None;
            }
        };

        let coordinate = match sample.coordinate() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Skipping fix: {}", e);
                self.status.last_error = Some(e.to_string());
                return None;
            }
        };

        self.health.update();
        let outcome = self.detector.on_sample(coordinate);
        let radius = self.detector.config().radius_m();

        log::debug!(
            "Distance from center: {:.2}m, Radius: {}m, Outside: {}, Accuracy: {}m",
            outcome.distance_m,
            radius,
            outcome.is_outside,
            sample.accuracy
        );

        match outcome.transition {
            Some(Transition::Breached) => log::warn!(
                "GEOFENCE BREACH DETECTED {:.1}m from home, SOS in {}s",
                outcome.distance_m,
                self.detector.countdown_remaining().unwrap_or(0)
            ),
            Some(Transition::Cleared) => {
                log::info!("Back inside geofence, resetting breach detection")
            }
            None => {}
        }

        self.status.tracking_status = TrackingStatus::TrackingActive;
        self.status.fixes_received += 1;
        self.status.last_distance_m = outcome.distance_m;
        self.status.gps_lat = Some(sample.latitude);
        self.status.gps_lon = Some(sample.longitude);
        self.status.gps_accuracy = Some(sample.accuracy);
        self.last_fix = Some(sample);
        self.refresh_status();

        Some(outcome)
    }

    /// One countdown second. Returns the delivery result if an alert fired.
    pub async fn handle_tick(&mut self) -> Option<Result<AlertReceipt, DeliveryError>> {
        self.health.check();

        let result = match self.detector.tick() {
            Some(trigger) => Some(self.dispatch(trigger).await),
            None => {
                if let Some(remaining) = self.detector.countdown_remaining() {
                    log::info!("Sending SOS in {} seconds", remaining);
                }
                None
            }
        };

        self.refresh_status();
        self.save_status();
        result
    }

    /// Returns false when the session should stop
    pub async fn handle_command(&mut self, command: GuardianCommand) -> bool {
        match command {
            GuardianCommand::CancelAlert => {
                if self.detector.cancel_alert() {
                    log::info!("SOS canceled");
                } else {
                    log::info!("No SOS countdown to cancel");
                }
            }
            GuardianCommand::TriggerSos => {
                let delay = self.settings.manual_countdown_secs;
                if self.detector.countdown_remaining().is_some() {
                    log::info!("SOS countdown already running");
                } else if let Some(trigger) = self.detector.trigger_manual(delay) {
                    self.send_now(trigger).await;
                } else {
                    log::warn!("Manual SOS in {} seconds", delay);
                }
            }
            GuardianCommand::TriggerSosNow => {
                if let Some(trigger) = self.detector.trigger_manual(0) {
                    self.send_now(trigger).await;
                }
            }
            GuardianCommand::SetPerimeter(config) => {
                self.detector.replace_config(config);
                log::info!(
                    "Geofence activated with {}m radius at ({:.6}, {:.6})",
                    config.radius_m(),
                    config.center().latitude(),
                    config.center().longitude()
                );
            }
            GuardianCommand::Stop => {
                log::info!("Stopping tracking");
                return false;
            }
        }
        self.refresh_status();
        true
    }

    async fn send_now(&mut self, trigger: AlertTrigger) {
        if let Err(e) = self.dispatch(trigger).await {
            log::warn!("Manual SOS not delivered, send it again if still needed: {}", e);
        }
    }

    async fn dispatch(&mut self, trigger: AlertTrigger) -> Result<AlertReceipt, DeliveryError> {
        let payload = AlertPayload::new(
            &self.settings.profile,
            self.last_fix.as_ref(),
            self.settings.battery_percent,
            trigger.cause,
        );
        log::warn!("Sending {:?} SOS alert for {}", trigger.cause, payload.name);

        match self.sink.send_alert(&payload).await {
            Ok(receipt) => {
                log::info!("SOS alert sent successfully");
                self.status.alerts_sent += 1;
                self.status.last_alert_at = Some(receipt.timestamp.to_rfc3339());
                Ok(receipt)
            }
            Err(e) => {
                log::error!("SOS alert failed: {}", e);
                self.status.alerts_failed += 1;
                self.status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn refresh_status(&mut self) {
        let config = self.detector.config();
        self.status.timestamp = current_timestamp();
        self.status.breach_state = self.detector.state();
        self.status.center_lat = config.center().latitude();
        self.status.center_lon = config.center().longitude();
        self.status.radius_m = config.radius_m();
        self.status.countdown_remaining = self.detector.countdown_remaining();
        self.status.gps_healthy = !self.health.is_silent();
        self.status.gps_silence_duration_secs = self.health.time_since_last_update().as_secs_f64();
    }

    fn save_status(&self) {
        if let Some(path) = self.settings.status_path.as_deref() {
            if let Err(e) = self.status.save(path) {
                log::warn!("Failed to write status to {}: {}", path, e);
            }
        }
    }
}

async fn next_event(watch: &mut Option<PositionWatch>) -> Option<PositionEvent> {
    match watch {
        Some(w) => w.next().await,
        None => std::future::pending().await,
    }
}
