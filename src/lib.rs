//! Geofence breach detection with a countdown-driven emergency alert.
//!
//! [`detector::BreachDetector`] is the core: a synchronous reducer over
//! location samples and one-second ticks. [`guardian::Guardian`] runs it
//! against a [`position::PositionWatch`] and an [`alert::AlertSink`].

pub mod alert;
pub mod battery;
pub mod countdown;
pub mod detector;
pub mod distance;
pub mod error;
pub mod guardian;
pub mod health_monitor;
pub mod live_status;
pub mod position;
pub mod types;

pub use alert::{AlertPayload, AlertReceipt, AlertSink, HttpAlertSink, LogAlertSink, UserProfile};
pub use countdown::{AlertCountdown, CountdownState};
pub use detector::{
    AlertCause, AlertTrigger, BreachDetector, BreachState, DetectorPolicy, SampleOutcome,
    Transition,
};
pub use distance::distance;
pub use error::{DeliveryError, GeofenceError, PositionError};
pub use guardian::{Guardian, GuardianCommand, GuardianReport, GuardianSettings};
pub use position::{PositionEvent, PositionSource, PositionWatch, WatchOptions};
pub use types::{Coordinate, GeofenceConfig, PositionSample};
