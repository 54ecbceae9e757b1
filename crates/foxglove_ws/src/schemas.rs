//! Serde bodies for the `foxglove.*` JSON schemas the relay publishes.
//!
//! Field names follow the Foxglove schema definitions (snake_case), so the
//! derived `Serialize` output matches what Studio expects on a channel
//! whose `schemaName` is one of the well-known types.

use serde::Serialize;

pub const COMPRESSED_IMAGE: &str = "foxglove.CompressedImage";
pub const CAMERA_CALIBRATION: &str = "foxglove.CameraCalibration";
pub const SCENE_UPDATE: &str = "foxglove.SceneUpdate";
pub const FRAME_TRANSFORMS: &str = "foxglove.FrameTransforms";

/// Combined seconds/nanoseconds timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl Timestamp {
    pub fn from_micros(us: i64) -> Self {
        Self {
            sec: us.div_euclid(1_000_000),
            nsec: (us.rem_euclid(1_000_000) * 1000) as u32,
        }
    }

    pub fn to_micros(self) -> i64 {
        self.sec * 1_000_000 + i64::from(self.nsec / 1000)
    }
}

/// Microseconds to the nanosecond log time used on the wire.
pub fn log_time_ns(timestamp_us: i64) -> u64 {
    (timestamp_us as u64).saturating_mul(1000)
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Duration {
    pub sec: i64,
    pub nsec: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressedImage {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub format: String,
    /// Base64 of the compressed payload (JSON channel encoding).
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraCalibration {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    #[serde(rename = "D")]
    pub d: Vec<f64>,
    #[serde(rename = "K")]
    pub k: [f64; 9],
    #[serde(rename = "R")]
    pub r: [f64; 9],
    #[serde(rename = "P")]
    pub p: [f64; 12],
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameTransforms {
    pub transforms: Vec<FrameTransform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameTransform {
    pub timestamp: Timestamp,
    pub parent_frame_id: String,
    pub child_frame_id: String,
    pub translation: Vector3,
    pub rotation: Quaternion,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneUpdate {
    pub entities: Vec<SceneEntity>,
    pub deletions: Vec<SceneEntityDeletion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneEntityDeletion {
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub kind: u8,
    pub id: String,
}

/// One visual entity; unused primitive lists stay empty, Studio tolerates
/// them but not their absence on all clients.
#[derive(Debug, Clone, Serialize)]
pub struct SceneEntity {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub id: String,
    pub lifetime: Duration,
    pub frame_locked: bool,
    pub metadata: Vec<KeyValuePair>,
    pub arrows: Vec<serde_json::Value>,
    pub cubes: Vec<CubePrimitive>,
    pub spheres: Vec<SpherePrimitive>,
    pub cylinders: Vec<serde_json::Value>,
    pub lines: Vec<serde_json::Value>,
    pub triangles: Vec<serde_json::Value>,
    pub texts: Vec<TextPrimitive>,
    pub models: Vec<serde_json::Value>,
}

impl SceneEntity {
    /// Entity with no primitives, vehicle-frame locked, finite lifetime.
    pub fn empty(timestamp: Timestamp, frame_id: &str, id: &str, lifetime: Duration) -> Self {
        Self {
            timestamp,
            frame_id: frame_id.to_owned(),
            id: id.to_owned(),
            lifetime,
            frame_locked: true,
            metadata: Vec::new(),
            arrows: Vec::new(),
            cubes: Vec::new(),
            spheres: Vec::new(),
            cylinders: Vec::new(),
            lines: Vec::new(),
            triangles: Vec::new(),
            texts: Vec::new(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CubePrimitive {
    pub pose: Pose,
    pub size: Vector3,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpherePrimitive {
    pub pose: Pose,
    pub size: Vector3,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPrimitive {
    pub pose: Pose,
    pub billboard: bool,
    pub font_size: f64,
    pub scale_invariant: bool,
    pub color: Color,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_to_timestamp_round_trips() {
        for us in [0i64, 1, 999_999, 1_000_000, 1_700_000_123_456_789] {
            let ts = Timestamp::from_micros(us);
            assert_eq!(ts.to_micros(), us, "round trip failed for {us}");
        }
    }

    #[test]
    fn timestamp_splits_micros() {
        let ts = Timestamp::from_micros(1_700_000_000_250_000);
        assert_eq!(ts.sec, 1_700_000_000);
        assert_eq!(ts.nsec, 250_000_000);
    }

    #[test]
    fn log_time_is_nanoseconds() {
        assert_eq!(log_time_ns(1_500_000), 1_500_000_000);
    }

    #[test]
    fn calibration_serializes_matrix_keys_uppercase() {
        let cal = CameraCalibration {
            timestamp: Timestamp::from_micros(0),
            frame_id: "base_link".into(),
            width: 1920,
            height: 1080,
            distortion_model: "plumb_bob".into(),
            d: vec![0.0; 5],
            k: [0.0; 9],
            r: [0.0; 9],
            p: [0.0; 12],
        };
        let text = serde_json::to_string(&cal).unwrap();
        for key in [r#""D":"#, r#""K":"#, r#""R":"#, r#""P":"#] {
            assert!(text.contains(key), "missing {key} in {text}");
        }
    }

    #[test]
    fn empty_entity_serializes_all_primitive_lists() {
        let entity = SceneEntity::empty(
            Timestamp::from_micros(0),
            "base_link",
            "annotations",
            Duration {
                sec: 0,
                nsec: 500_000_000,
            },
        );
        let value = serde_json::to_value(&entity).unwrap();
        for key in [
            "arrows", "cubes", "spheres", "cylinders", "lines", "triangles", "texts", "models",
        ] {
            assert!(value.get(key).is_some_and(|v| v.is_array()), "missing {key}");
        }
        assert_eq!(value["frame_locked"], serde_json::json!(true));
    }
}
