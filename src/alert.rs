use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::detector::AlertCause;
use crate::error::DeliveryError;
use crate::types::PositionSample;

pub const ANONYMOUS_NAME: &str = "Anonymous User";

/// Who the alert is about
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Option<String>,
    pub name: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            user_id: None,
            name: ANONYMOUS_NAME.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl From<&PositionSample> for AlertLocation {
    fn from(s: &PositionSample) -> Self {
        Self {
            latitude: s.latitude,
            longitude: s.longitude,
            accuracy: Some(s.accuracy),
        }
    }
}

/// Body of the `POST /sos` request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub user_id: Option<String>,
    pub name: String,
    pub location: Option<AlertLocation>,
    /// Battery percentage, if the device reported one
    pub battery: Option<u8>,
    pub cause: AlertCause,
    pub triggered_at: DateTime<Utc>,
}

impl AlertPayload {
    pub fn new(
        profile: &UserProfile,
        last_fix: Option<&PositionSample>,
        battery: Option<u8>,
        cause: AlertCause,
    ) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            name: profile.name.clone(),
            location: last_fix.map(AlertLocation::from),
            battery,
            cause,
            triggered_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertReceipt {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Location as echoed back by the alert service
    pub location: Option<AlertLocation>,
}

/// Destination for a fired alert. Called once per firing; no retries.
pub trait AlertSink: Send + Sync {
    fn send_alert<'a>(
        &'a self,
        alert: &'a AlertPayload,
    ) -> BoxFuture<'a, Result<AlertReceipt, DeliveryError>>;
}

impl<T: AlertSink + ?Sized> AlertSink for Box<T> {
    fn send_alert<'a>(
        &'a self,
        alert: &'a AlertPayload,
    ) -> BoxFuture<'a, Result<AlertReceipt, DeliveryError>> {
        (**self).send_alert(alert)
    }
}

#[derive(Deserialize)]
struct SosResponse {
    success: bool,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    location: Option<AlertLocation>,
    #[serde(default)]
    message: Option<String>,
}

/// Interpret the alert service's JSON reply
pub fn parse_sos_response(body: &str) -> Result<AlertReceipt, DeliveryError> {
    let resp: SosResponse =
        serde_json::from_str(body).map_err(|e| DeliveryError::Parse(e.to_string()))?;

    if !resp.success {
        return Err(DeliveryError::Rejected(
            resp.message
                .unwrap_or_else(|| "Failed to send SOS".to_string()),
        ));
    }

    let timestamp = resp
        .timestamp
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(AlertReceipt {
        success: true,
        timestamp,
        location: resp.location,
    })
}

fn check_status(status: reqwest::StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    log::warn!("Alert service answered HTTP {}", status.as_u16());
    Err(DeliveryError::Http(status.as_u16()))
}

/// Posts alerts to `{api_url}/sos`
pub struct HttpAlertSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAlertSink {
    pub fn new(api_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("geofence_guardian/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: format!("{}/sos", api_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, alert: &AlertPayload) -> Result<AlertReceipt, DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(alert)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Network("request timed out".to_string())
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        check_status(response.status())?;

        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Network(format!("Failed to read response: {}", e)))?;

        parse_sos_response(&body)
    }
}

impl AlertSink for HttpAlertSink {
    fn send_alert<'a>(
        &'a self,
        alert: &'a AlertPayload,
    ) -> BoxFuture<'a, Result<AlertReceipt, DeliveryError>> {
        self.post(alert).boxed()
    }
}

/// Demo sink: logs the alert instead of sending it
#[derive(Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send_alert<'a>(
        &'a self,
        alert: &'a AlertPayload,
    ) -> BoxFuture<'a, Result<AlertReceipt, DeliveryError>> {
        async move {
            log::warn!(
                "[DEMO MODE] Would send {:?} SOS for {} at {:?} (battery {:?})",
                alert.cause,
                alert.name,
                alert.location,
                alert.battery
            );
            Ok(AlertReceipt {
                success: true,
                timestamp: Utc::now(),
                location: alert.location.clone(),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PositionSample {
        PositionSample {
            timestamp: 0.0,
            latitude: 37.7749,
            longitude: -122.4194,
            accuracy: 8.0,
        }
    }

    #[test]
    fn test_payload_json_shape() {
        let profile = UserProfile {
            user_id: Some("demo_user_123".to_string()),
            name: "Demo User".to_string(),
        };
        let payload = AlertPayload::new(&profile, Some(&sample()), Some(76), AlertCause::Breach);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["user_id"], "demo_user_123");
        assert_eq!(json["name"], "Demo User");
        assert_eq!(json["location"]["latitude"], 37.7749);
        assert_eq!(json["location"]["accuracy"], 8.0);
        assert_eq!(json["battery"], 76);
        assert_eq!(json["cause"], "breach");
    }

    #[test]
    fn test_payload_without_fix_or_battery() {
        let payload = AlertPayload::new(&UserProfile::default(), None, None, AlertCause::Manual);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["name"], ANONYMOUS_NAME);
        assert!(json["location"].is_null());
        assert!(json["battery"].is_null());
        assert_eq!(json["cause"], "manual");
    }

    #[test]
    fn test_parse_success_response() {
        let body = r#"{
            "success": true,
            "timestamp": "2024-05-01T12:30:00Z",
            "location": {"latitude": 37.7749, "longitude": -122.4194}
        }"#;
        let receipt = parse_sos_response(body).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.timestamp.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert_eq!(receipt.location.unwrap().longitude, -122.4194);
    }

    #[test]
    fn test_parse_success_without_timestamp() {
        let receipt = parse_sos_response(r#"{"success": true}"#).unwrap();
        assert!(receipt.location.is_none());
    }

    #[test]
    fn test_parse_rejected_response() {
        let err = parse_sos_response(r#"{"success": false, "message": "no contacts"}"#).unwrap_err();
        assert_eq!(err, DeliveryError::Rejected("no contacts".to_string()));

        let err = parse_sos_response(r#"{"success": false}"#).unwrap_err();
        assert_eq!(err, DeliveryError::Rejected("Failed to send SOS".to_string()));
    }

    #[test]
    fn test_parse_garbage_response() {
        assert!(matches!(
            parse_sos_response("<html>502</html>"),
            Err(DeliveryError::Parse(_))
        ));
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            HttpAlertSink::new("http://localhost:5000/api/").endpoint(),
            "http://localhost:5000/api/sos"
        );
        assert_eq!(
            HttpAlertSink::new("http://localhost:5000/api").endpoint(),
            "http://localhost:5000/api/sos"
        );
    }

    #[tokio::test]
    async fn test_log_sink_succeeds() {
        let payload = AlertPayload::new(&UserProfile::default(), Some(&sample()), None, AlertCause::Breach);
        let receipt = LogAlertSink.send_alert(&payload).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.location, payload.location);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(check_status(reqwest::StatusCode::OK), Ok(()));
        assert_eq!(check_status(reqwest::StatusCode::CREATED), Ok(()));
        assert_eq!(
            check_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            Err(DeliveryError::Http(500))
        );
        assert_eq!(
            check_status(reqwest::StatusCode::NOT_FOUND),
            Err(DeliveryError::Http(404))
        );
    }

    // Opens a real socket, disabled by default
    #[tokio::test]
    #[ignore]
    async fn test_http_sink_unreachable_is_delivery_error() {
        // Nothing should be serving HTTP on the discard port
        let sink = HttpAlertSink::new("http://127.0.0.1:9/api");
        let payload = AlertPayload::new(&UserProfile::default(), None, None, AlertCause::Manual);
        assert!(sink.send_alert(&payload).await.is_err());
    }

    // Integration test (requires a running alert service, disabled by default)
    #[tokio::test]
    #[ignore]
    async fn test_http_sink_integration() {
        let sink = HttpAlertSink::new("http://localhost:5000/api");
        let payload = AlertPayload::new(&UserProfile::default(), Some(&sample()), None, AlertCause::Manual);
        match sink.send_alert(&payload).await {
            Ok(receipt) => assert!(receipt.success),
            Err(e) => panic!("Alert failed: {}", e),
        }
    }
}
