use serde::{Deserialize, Serialize};

use crate::error::{GeoResult, GeofenceError};

/// A validated WGS84 position in degrees.
///
/// Fields are private so every value has passed the range check, including
/// values read back from JSON.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = GeofenceError;

    fn try_from(raw: RawCoordinate) -> GeoResult<Self> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> GeoResult<Self> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if !lat_ok || !lon_ok {
            return Err(GeofenceError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl From<Coordinate> for geo::Point<f64> {
    fn from(c: Coordinate) -> Self {
        // geo points are (x = lon, y = lat)
        geo::Point::new(c.longitude, c.latitude)
    }
}

impl TryFrom<geo::Point<f64>> for Coordinate {
    type Error = GeofenceError;

    fn try_from(p: geo::Point<f64>) -> GeoResult<Self> {
        Coordinate::new(p.y(), p.x())
    }
}

/// Circular safety perimeter around a home location
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeofence")]
pub struct GeofenceConfig {
    center: Coordinate,
    radius_m: f64,
}

#[derive(Deserialize)]
struct RawGeofence {
    center: Coordinate,
    radius_m: f64,
}

impl TryFrom<RawGeofence> for GeofenceConfig {
    type Error = GeofenceError;

    fn try_from(raw: RawGeofence) -> GeoResult<Self> {
        GeofenceConfig::new(raw.center, raw.radius_m)
    }
}

impl GeofenceConfig {
    pub fn new(center: Coordinate, radius_m: f64) -> GeoResult<Self> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(GeofenceError::InvalidRadius(radius_m));
        }
        Ok(Self { center, radius_m })
    }

    pub fn center(&self) -> Coordinate {
        self.center
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }
}

/// A raw fix as delivered by a position source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Unix seconds. Recorded tracks may omit it.
    #[serde(default)]
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
}

impl PositionSample {
    pub fn coordinate(&self) -> GeoResult<Coordinate> {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Seconds between the fix and `now` (unix seconds)
    pub fn age_secs(&self, now: f64) -> f64 {
        (now - self.timestamp).max(0.0)
    }
}
