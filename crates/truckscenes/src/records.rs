//! Record types for the metadata tables.
//!
//! Every table is a JSON array of flat records joined by opaque string
//! tokens. An empty token string means "no reference" (e.g. the end of a
//! sample linked list).

use std::collections::BTreeMap;

use serde::Deserialize;

/// A recorded driving sequence, referencing a linked list of samples.
#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    pub token: String,
    pub log_token: String,
    pub nbr_samples: u32,
    pub first_sample_token: String,
    pub last_sample_token: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A synchronized timestamp across all sensors.
///
/// `data` (channel name to `sample_data` token) and `anns` are derived
/// indexes built after load; they are not present in the JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    pub token: String,
    pub scene_token: String,
    /// Microseconds since epoch.
    pub timestamp: i64,
    pub prev: String,
    pub next: String,
    #[serde(skip)]
    pub data: BTreeMap<String, String>,
    #[serde(skip)]
    pub anns: Vec<String>,
}

/// One sensor reading: a file on disk plus its pose/calibration links.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleData {
    pub token: String,
    pub sample_token: String,
    pub ego_pose_token: String,
    pub calibrated_sensor_token: String,
    /// Relative to the dataroot.
    pub filename: String,
    pub fileformat: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub timestamp: i64,
    pub is_key_frame: bool,
    pub prev: String,
    pub next: String,
}

/// The vehicle's global position/orientation at a timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct EgoPose {
    pub token: String,
    pub timestamp: i64,
    /// Meters, global frame.
    pub translation: [f64; 3],
    /// Unit quaternion, `[w, x, y, z]`.
    pub rotation: [f64; 4],
}

/// Sensor extrinsics (vehicle frame) and, for cameras, intrinsics.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibratedSensor {
    pub token: String,
    pub sensor_token: String,
    pub translation: [f64; 3],
    /// Unit quaternion, `[w, x, y, z]`.
    pub rotation: [f64; 4],
    /// 3x3 row-major; empty for non-camera sensors.
    #[serde(default)]
    pub camera_intrinsic: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sensor {
    pub token: String,
    /// E.g. `CAMERA_LEFT_FRONT`, `LIDAR_LEFT`, `RADAR_RIGHT_FRONT`.
    pub channel: String,
    /// `camera`, `lidar` or `radar`.
    pub modality: String,
}

/// One object bounding box at one timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleAnnotation {
    pub token: String,
    pub sample_token: String,
    pub instance_token: String,
    #[serde(default)]
    pub visibility_token: String,
    #[serde(default)]
    pub attribute_tokens: Vec<String>,
    /// Box center, meters, global frame.
    pub translation: [f64; 3],
    /// `[width, length, height]` in meters.
    pub size: [f64; 3],
    /// Unit quaternion, `[w, x, y, z]`.
    pub rotation: [f64; 4],
    pub prev: String,
    pub next: String,
    #[serde(default)]
    pub num_lidar_pts: u32,
    #[serde(default)]
    pub num_radar_pts: u32,
}

/// A tracked object across its annotations.
#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub token: String,
    pub category_token: String,
    pub nbr_annotations: u32,
    pub first_annotation_token: String,
    pub last_annotation_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub token: String,
    /// Dotted taxonomy name, e.g. `vehicle.car`.
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attribute {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Visibility {
    pub token: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub token: String,
    #[serde(default)]
    pub logfile: String,
    #[serde(default)]
    pub vehicle: String,
    #[serde(default)]
    pub date_captured: String,
    #[serde(default)]
    pub location: String,
}
