use thiserror::Error;

/// Validation errors for geofence inputs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeofenceError {
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid radius: {0} m (must be finite and > 0)")]
    InvalidRadius(f64),

    #[error("Invalid detector policy: {0}")]
    InvalidPolicy(String),
}

/// Result type for geofence construction
pub type GeoResult<T> = Result<T, GeofenceError>;

/// Errors surfaced by a position source instead of a fix
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location request timed out")]
    Timeout,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Unreadable location fix: {0}")]
    Parse(String),

    /// The source has no more fixes to give
    #[error("Position stream closed")]
    Closed,
}

/// Alert delivery failures. Reported, never retried here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Alert rejected: {0}")]
    Rejected(String),

    #[error("Unreadable alert response: {0}")]
    Parse(String),
}
