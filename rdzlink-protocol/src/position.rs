use serde::{Deserialize, Serialize};

/// A single GPS position fix from the host device.
///
/// Serialized field names follow the station's JSON schema.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Degrees north.
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Degrees east.
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Metres above the WGS84 ellipsoid.
    #[serde(rename = "alt")]
    pub altitude: f64,
    /// Course over ground, degrees clockwise from north.
    #[serde(rename = "course")]
    pub bearing: f32,
    /// Horizontal accuracy radius in metres.
    #[serde(rename = "acc")]
    pub accuracy: f32,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, bearing: f32, accuracy: f32) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            bearing,
            accuracy,
        }
    }
}
