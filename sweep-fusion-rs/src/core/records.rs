//! Dataset record types.
//!
//! These mirror the JSON tables of a nuScenes-style dataset (`sample`,
//! `sample_data`, `calibrated_sensor`, `sensor`, `ego_pose`, `scene`). Null links are
//! encoded as empty strings on disk and surface here as `None`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::transforms::{RigidTransform, TransformError};

/// Full-row index of the lidar intensity column (`x y z intensity`).
pub const LIDAR_INTENSITY_COLUMN: usize = 3;

/// Full-row index of the radar cross-section column
/// (`x y z vrel_x vrel_y vrel_z rcs`).
pub const RADAR_INTENSITY_COLUMN: usize = 6;

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Sensor modality tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorModality {
    Lidar,
    Radar,
    Camera,
    Other(String),
}

impl SensorModality {
    /// Whether the fusion pipeline knows how to read this modality.
    pub fn is_point_cloud(&self) -> bool {
        matches!(self, SensorModality::Lidar | SensorModality::Radar)
    }

    /// Full-row column holding the intensity (or intensity-equivalent) value.
    pub fn intensity_column(&self) -> Option<usize> {
        match self {
            SensorModality::Lidar => Some(LIDAR_INTENSITY_COLUMN),
            SensorModality::Radar => Some(RADAR_INTENSITY_COLUMN),
            _ => None,
        }
    }
}

impl Default for SensorModality {
    fn default() -> Self {
        SensorModality::Other(String::new())
    }
}

impl From<String> for SensorModality {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "lidar" => SensorModality::Lidar,
            "radar" => SensorModality::Radar,
            "camera" => SensorModality::Camera,
            _ => SensorModality::Other(value),
        }
    }
}

impl From<SensorModality> for String {
    fn from(value: SensorModality) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SensorModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorModality::Lidar => f.write_str("lidar"),
            SensorModality::Radar => f.write_str("radar"),
            SensorModality::Camera => f.write_str("camera"),
            SensorModality::Other(name) => f.write_str(name),
        }
    }
}

/// One keyframe of a recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub token: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub prev: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub next: Option<String>,

    /// Capture time in microseconds.
    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub scene_token: String,

    /// Sensor channel name -> sensor-data token of the keyframe capture.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// One sweep captured by one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDataRecord {
    pub token: String,

    pub sample_token: String,

    pub calibrated_sensor_token: String,

    /// Path of the backing point file, relative to the dataset root.
    pub filename: String,

    #[serde(default)]
    pub sensor_modality: SensorModality,

    #[serde(default)]
    pub channel: String,

    /// Previous sweep of the same sensor.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub prev: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub next: Option<String>,

    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub is_key_frame: bool,

    /// Vehicle pose at capture time.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ego_pose_token: Option<String>,
}

/// Extrinsic calibration of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub token: String,

    #[serde(default)]
    pub sensor_token: String,

    /// Sensor origin in the ego frame, in meters.
    pub translation: [f64; 3],

    /// Sensor-to-ego rotation, scalar-first `(w, x, y, z)`.
    pub rotation: [f64; 4],
}

impl CalibrationRecord {
    /// Sensor-to-ego rigid transform. Fails on a non-unit quaternion.
    pub fn rigid_transform(&self) -> Result<RigidTransform, TransformError> {
        RigidTransform::new(self.translation, self.rotation)
    }
}

/// Vehicle pose in the global frame at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgoPoseRecord {
    pub token: String,

    pub translation: [f64; 3],

    /// Ego-to-global rotation, scalar-first `(w, x, y, z)`.
    pub rotation: [f64; 4],

    #[serde(default)]
    pub timestamp: i64,
}

impl EgoPoseRecord {
    /// Ego-to-global rigid transform.
    pub fn rigid_transform(&self) -> Result<RigidTransform, TransformError> {
        RigidTransform::new(self.translation, self.rotation)
    }
}

/// Physical sensor description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub token: String,
    pub channel: String,
    pub modality: SensorModality,
}

/// A recording session with the endpoints of its sample chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub token: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub nbr_samples: usize,

    pub first_sample_token: String,

    pub last_sample_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_record_empty_links_are_none() {
        let json = r#"{"token":"a","prev":"","next":"b","timestamp":10,"scene_token":"s"}"#;
        let sample: SampleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(sample.prev, None);
        assert_eq!(sample.next.as_deref(), Some("b"));
        assert!(sample.data.is_empty());
    }

    #[test]
    fn test_modality_parsing() {
        let sensor: SensorRecord =
            serde_json::from_str(r#"{"token":"s","channel":"RADAR_LEFT_FRONT","modality":"radar"}"#)
                .unwrap();
        assert_eq!(sensor.modality, SensorModality::Radar);
        assert_eq!(sensor.modality.intensity_column(), Some(RADAR_INTENSITY_COLUMN));

        let other = SensorModality::from("sonar".to_string());
        assert!(!other.is_point_cloud());
        assert_eq!(other.to_string(), "sonar");
        assert_eq!(SensorModality::from("LIDAR".to_string()), SensorModality::Lidar);
    }

    #[test]
    fn test_calibration_record_transform() {
        let json = r#"{"token":"c","sensor_token":"s","translation":[1.0,2.0,3.0],
                       "rotation":[1.0,0.0,0.0,0.0],"camera_intrinsic":[]}"#;
        let calib: CalibrationRecord = serde_json::from_str(json).unwrap();

        let tf = calib.rigid_transform().unwrap();
        assert_eq!(tf.apply([0.0, 0.0, 0.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_ego_pose_token_and_record() {
        let json = r#"{"token":"d","sample_token":"s","calibrated_sensor_token":"c",
                       "filename":"a.pcd","ego_pose_token":""}"#;
        let record: SensorDataRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.ego_pose_token, None);

        let pose: EgoPoseRecord = serde_json::from_str(
            r#"{"token":"e","translation":[10.0,0.0,0.0],
                "rotation":[1.0,0.0,0.0,0.0],"timestamp":5}"#,
        )
        .unwrap();
        let tf = pose.rigid_transform().unwrap();
        assert_eq!(tf.apply([1.0, 0.0, 0.0]), [11.0, 0.0, 0.0]);
    }
}
