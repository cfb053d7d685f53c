use serde::Deserialize;
use tokio::process::Command;

#[derive(Deserialize)]
struct BatteryStatus {
    percentage: f64,
}

/// Battery percentage from Termux:API, if the device reports one
pub async fn read_battery_percent() -> Option<u8> {
    let output = Command::new("termux-battery-status").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    parse_battery_status(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `termux-battery-status` JSON
pub fn parse_battery_status(text: &str) -> Option<u8> {
    let status: BatteryStatus = serde_json::from_str(text.trim()).ok()?;
    if !status.percentage.is_finite() {
        return None;
    }
    Some(status.percentage.round().clamp(0.0, 100.0) as u8)
}
