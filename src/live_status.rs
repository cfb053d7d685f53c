use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detector::BreachState;

/// Where the guardian is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Inactive,
    LocationSet,
    TrackingActive,
    TrackingError,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub tracking_status: TrackingStatus,
    pub breach_state: BreachState,
    // Perimeter
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
    pub last_distance_m: f64,
    // Alerting
    pub countdown_remaining: Option<u32>,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub last_alert_at: Option<String>,
    // Last fix
    pub fixes_received: u64,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub gps_accuracy: Option<f64>,
    // Health
    pub gps_healthy: bool,
    pub gps_silence_duration_secs: f64,
    pub battery_percent: Option<u8>,
    pub last_error: Option<String>,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            tracking_status: TrackingStatus::Inactive,
            breach_state: BreachState::Inside,
            center_lat: 0.0,
            center_lon: 0.0,
            radius_m: 0.0,
            last_distance_m: 0.0,
            countdown_remaining: None,
            alerts_sent: 0,
            alerts_failed: 0,
            last_alert_at: None,
            fixes_received: 0,
            gps_lat: None,
            gps_lon: None,
            gps_accuracy: None,
            gps_healthy: true,
            gps_silence_duration_secs: 0.0,
            battery_percent: None,
            last_error: None,
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
