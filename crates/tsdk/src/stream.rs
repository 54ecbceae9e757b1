//! The Foxglove streaming relay: walks the sample linked lists in order
//! and forwards each frame to per-sensor topics.
//!
//! One sequential loop, a fixed pacing delay between frames, and a stop
//! flag checked between frames. A failed sensor conversion is logged and
//! the frame continues; only a broken sample chain aborts a scene.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use foxglove_ws::schemas::{
    self, CameraCalibration, Color, CompressedImage, FrameTransform, FrameTransforms, Pose,
    Quaternion, SceneEntity, SceneUpdate, SpherePrimitive, TextPrimitive, Timestamp, Vector3,
};
use foxglove_ws::{ChannelId, ChannelSpec, FoxgloveServer};
use pointcloud::{PointMatrix, RCS_CHANNEL};
use truckscenes::{CalibratedSensor, Sample, SampleData, TruckScenes};

use crate::color;
use crate::config::Config;
use crate::metrics::DevkitMetrics;
use crate::transform;

const FRAME_DELAY: Duration = Duration::from_millis(100);
const LIDAR_MAX_POINTS: usize = 3000;
const RADAR_MAX_POINTS: usize = 800;
const LIDAR_POINT_SIZE: f64 = 0.1;
const RADAR_POINT_SIZE: f64 = 0.3;
const VEHICLE_FRAME: &str = "base_link";
const WORLD_FRAME: &str = "world";

/// Entities go stale after half a second so paused playback clears.
const ENTITY_LIFETIME: schemas::Duration = schemas::Duration {
    sec: 0,
    nsec: 500_000_000,
};

/// The lidar channels whose ego pose anchors the annotation frame.
const EGO_POSE_CHANNELS: [&str; 2] = ["LIDAR_LEFT", "LIDAR_TOP_FRONT"];

pub struct Streamer {
    ts: TruckScenes,
    server: FoxgloveServer,
    /// sensor channel name -> foxglove channel
    channels: HashMap<String, ChannelId>,
    /// sensor channel name -> dataset modality
    modalities: HashMap<String, String>,
    tf_channel: ChannelId,
    annotations_channel: ChannelId,
    metrics: Arc<DevkitMetrics>,
}

/// Serve the WebSocket endpoint and walk the dataset until done or
/// interrupted.
pub async fn run(ts: TruckScenes, config: &Config, metrics: Arc<DevkitMetrics>) -> anyhow::Result<()> {
    // Validate --scene before binding anything.
    let scene_tokens: Vec<String> = match config.scene {
        Some(index) => vec![ts.scene_at(index)?.token.clone()],
        None => ts.scenes.iter().map(|s| s.token.clone()).collect(),
    };

    let server = FoxgloveServer::new("TruckScenes Streamer");
    let streamer = Streamer::new(ts, server.clone(), metrics);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind WebSocket port {}", config.port))?;
    tracing::info!(port = config.port, "Foxglove server started, connect Studio to ws://localhost:{}", config.port);

    let router = server.router();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.unwrap();
    });

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, stopping after current frame");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    streamer.stream(&scene_tokens, &stop).await
}

impl Streamer {
    pub fn new(ts: TruckScenes, server: FoxgloveServer, metrics: Arc<DevkitMetrics>) -> Self {
        let mut channels = HashMap::new();
        let mut modalities = HashMap::new();
        let mut counts: HashMap<String, usize> = HashMap::new();

        for sensor in &ts.sensors {
            let channel = sensor.channel.clone();
            let id = match sensor.modality.as_str() {
                "camera" => {
                    // Schema telling Studio the data field is base64.
                    let image_schema = serde_json::json!({
                        "type": "object",
                        "properties": {
                            "timestamp": {"type": "object"},
                            "frame_id": {"type": "string"},
                            "format": {"type": "string"},
                            "data": {"type": "string", "contentEncoding": "base64"}
                        }
                    });
                    let id = server.add_channel(ChannelSpec::json_with_schema(
                        format!("/camera/{channel}"),
                        schemas::COMPRESSED_IMAGE,
                        image_schema.to_string(),
                    ));
                    let info = server.add_channel(ChannelSpec::json(
                        format!("/camera/{channel}/camera_info"),
                        schemas::CAMERA_CALIBRATION,
                    ));
                    channels.insert(format!("{channel}_info"), info);
                    id
                }
                "lidar" => server.add_channel(ChannelSpec::json(
                    format!("/lidar/{channel}"),
                    schemas::SCENE_UPDATE,
                )),
                "radar" => server.add_channel(ChannelSpec::json(
                    format!("/radar/{channel}"),
                    schemas::SCENE_UPDATE,
                )),
                other => {
                    tracing::warn!(channel = %channel, modality = other, "skipping sensor with unknown modality");
                    continue;
                }
            };
            *counts.entry(sensor.modality.clone()).or_default() += 1;
            modalities.insert(channel.clone(), sensor.modality.clone());
            channels.insert(channel, id);
        }

        let tf_channel = server.add_channel(ChannelSpec::json("/tf", schemas::FRAME_TRANSFORMS));
        let annotations_channel =
            server.add_channel(ChannelSpec::json("/annotations", schemas::SCENE_UPDATE));

        tracing::info!(
            cameras = counts.get("camera").copied().unwrap_or(0),
            lidars = counts.get("lidar").copied().unwrap_or(0),
            radars = counts.get("radar").copied().unwrap_or(0),
            "channels registered (+ /annotations + /tf)"
        );

        Self {
            ts,
            server,
            channels,
            modalities,
            tf_channel,
            annotations_channel,
            metrics,
        }
    }

    /// Walk the given scenes frame by frame.
    pub async fn stream(&self, scene_tokens: &[String], stop: &AtomicBool) -> anyhow::Result<()> {
        for (idx, scene_token) in scene_tokens.iter().enumerate() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let scene = self.ts.scene(scene_token)?;
            tracing::info!(
                scene = %scene.name,
                index = idx,
                total = scene_tokens.len(),
                samples = scene.nbr_samples,
                "streaming scene"
            );

            // scene_samples bounds the walk, so a corrupt next chain
            // cannot keep the relay replaying forever.
            let samples = match self.ts.scene_samples(scene_token) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "sample chain broken, skipping rest of scene");
                    continue;
                }
            };

            let mut frames = 0u64;
            for sample in samples {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                self.send_frame(sample);

                frames += 1;
                self.metrics.frames_streamed_total.inc();
                self.metrics
                    .connected_clients
                    .set(self.server.client_count() as i64);
                if frames % 10 == 0 {
                    tracing::debug!(frames, "streaming progress");
                }

                tokio::time::sleep(FRAME_DELAY).await;
            }
        }
        tracing::info!("streaming complete");
        Ok(())
    }

    /// One sample: TF first, then every sensor, then annotations.
    fn send_frame(&self, sample: &Sample) {
        let timestamp = sample.timestamp;
        self.send_transforms(timestamp);

        for (channel, sd_token) in &sample.data {
            let Some(modality) = self.modalities.get(channel) else {
                continue;
            };
            let result = match modality.as_str() {
                "camera" => self.send_camera(channel, sd_token, timestamp),
                "lidar" => self.send_pointcloud(channel, sd_token, timestamp, true),
                "radar" => self.send_pointcloud(channel, sd_token, timestamp, false),
                _ => Ok(()),
            };
            if let Err(e) = result {
                self.metrics.conversion_errors_total.inc();
                tracing::warn!(channel = %channel, error = %e, "sensor conversion failed");
            }
        }

        if let Err(e) = self.send_annotations(sample) {
            self.metrics.conversion_errors_total.inc();
            tracing::warn!(error = %e, "annotation conversion failed");
        }
    }

    fn publish<T: serde::Serialize>(&self, channel: ChannelId, timestamp_us: i64, body: &T) {
        match serde_json::to_vec(body) {
            Ok(payload) => {
                let delivered =
                    self.server
                        .broadcast(channel, schemas::log_time_ns(timestamp_us), &payload);
                if delivered > 0 {
                    self.metrics.messages_sent_total.inc();
                }
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "failed to encode message body");
            }
        }
    }

    fn send_transforms(&self, timestamp_us: i64) {
        let body = FrameTransforms {
            transforms: vec![FrameTransform {
                timestamp: Timestamp::from_micros(timestamp_us),
                parent_frame_id: WORLD_FRAME.to_owned(),
                child_frame_id: VEHICLE_FRAME.to_owned(),
                translation: Vector3::default(),
                rotation: Quaternion::default(),
            }],
        };
        self.publish(self.tf_channel, timestamp_us, &body);
    }

    fn send_camera(&self, channel: &str, sd_token: &str, timestamp_us: i64) -> anyhow::Result<()> {
        let sd = self.ts.sample_data(sd_token)?;
        let path = self.ts.sample_data_path(sd_token)?;
        let bytes =
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;

        let image = CompressedImage {
            timestamp: Timestamp::from_micros(timestamp_us),
            frame_id: VEHICLE_FRAME.to_owned(),
            format: image_format(&sd.fileformat),
            data: BASE64.encode(&bytes),
        };
        if let Some(&id) = self.channels.get(channel) {
            self.publish(id, timestamp_us, &image);
        }

        if let Some(&info_id) = self.channels.get(&format!("{channel}_info")) {
            let cal = self.ts.calibrated_sensor(&sd.calibrated_sensor_token)?;
            let body = camera_calibration(sd, cal, timestamp_us);
            self.publish(info_id, timestamp_us, &body);
        }
        Ok(())
    }

    fn send_pointcloud(
        &self,
        channel: &str,
        sd_token: &str,
        timestamp_us: i64,
        is_lidar: bool,
    ) -> anyhow::Result<()> {
        let path = self.ts.sample_data_path(sd_token)?;
        let entity = if is_lidar {
            let cloud = pointcloud::read_lidar_file(&path)
                .with_context(|| format!("decoding {}", path.display()))?;
            lidar_entity(&cloud, channel, timestamp_us)
        } else {
            let cloud = pointcloud::read_radar_file(&path)
                .with_context(|| format!("decoding {}", path.display()))?;
            radar_entity(&cloud, channel, timestamp_us)
        };

        if entity.spheres.is_empty() {
            return Ok(());
        }
        if let Some(&id) = self.channels.get(channel) {
            let body = SceneUpdate {
                entities: vec![entity],
                deletions: Vec::new(),
            };
            self.publish(id, timestamp_us, &body);
        }
        Ok(())
    }

    fn send_annotations(&self, sample: &Sample) -> anyhow::Result<()> {
        let timestamp_us = sample.timestamp;
        // The ego pose hangs off a lidar sample_data; without one the
        // frame simply has no annotation update.
        let Some(sd_token) = EGO_POSE_CHANNELS.iter().find_map(|ch| sample.data.get(*ch)) else {
            return Ok(());
        };
        let sd = self.ts.sample_data(sd_token)?;
        let ego = self.ts.ego_pose(&sd.ego_pose_token)?;

        let mut entity = SceneEntity::empty(
            Timestamp::from_micros(timestamp_us),
            VEHICLE_FRAME,
            "annotations",
            ENTITY_LIFETIME,
        );

        for ann_token in &sample.anns {
            let ann = self.ts.sample_annotation(ann_token)?;
            let category = self.ts.annotation_category(ann)?;
            let rel =
                transform::ego_relative(ego.translation, ego.rotation, ann.translation, ann.rotation);

            let [width, length, height] = ann.size;
            let pose = Pose {
                position: Vector3 {
                    x: rel.position.x,
                    y: rel.position.y,
                    z: rel.position.z,
                },
                orientation: Quaternion {
                    x: rel.orientation.x,
                    y: rel.orientation.y,
                    z: rel.orientation.z,
                    w: rel.orientation.w,
                },
            };
            entity.cubes.push(schemas::CubePrimitive {
                pose,
                size: Vector3 {
                    x: length,
                    y: width,
                    z: height,
                },
                color: color::category_color(&category.name),
            });
            entity.texts.push(TextPrimitive {
                pose: Pose {
                    position: Vector3 {
                        x: rel.position.x,
                        y: rel.position.y,
                        z: rel.position.z + height / 2.0 + 0.5,
                    },
                    orientation: Quaternion::default(),
                },
                billboard: true,
                font_size: 12.0,
                scale_invariant: true,
                color: Color {
                    r: 1.0,
                    g: 1.0,
                    b: 1.0,
                    a: 1.0,
                },
                text: short_category_name(&category.name).to_owned(),
            });
        }

        if !entity.cubes.is_empty() {
            let body = SceneUpdate {
                entities: vec![entity],
                deletions: Vec::new(),
            };
            self.publish(self.annotations_channel, timestamp_us, &body);
        }
        Ok(())
    }
}

/// Dataset file extensions to Foxglove image format names.
fn image_format(fileformat: &str) -> String {
    match fileformat {
        "jpg" | "jpeg" => "jpeg".to_owned(),
        other => other.to_owned(),
    }
}

/// Last dotted segment: `vehicle.car` -> `car`.
fn short_category_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Camera calibration from dataset intrinsics, with 1080p pinhole
/// defaults when the record carries none.
fn camera_calibration(sd: &SampleData, cal: &CalibratedSensor, timestamp_us: i64) -> CameraCalibration {
    let (fx, fy, cx, cy) = intrinsics(cal).unwrap_or((1000.0, 1000.0, 960.0, 540.0));
    CameraCalibration {
        timestamp: Timestamp::from_micros(timestamp_us),
        frame_id: VEHICLE_FRAME.to_owned(),
        width: sd.width.unwrap_or(1920),
        height: sd.height.unwrap_or(1080),
        distortion_model: "plumb_bob".to_owned(),
        d: vec![0.0; 5],
        k: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
        r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        p: [fx, 0.0, cx, 0.0, 0.0, fy, cy, 0.0, 0.0, 0.0, 1.0, 0.0],
    }
}

fn intrinsics(cal: &CalibratedSensor) -> Option<(f64, f64, f64, f64)> {
    let k = &cal.camera_intrinsic;
    if k.len() == 3 && k.iter().all(|row| row.len() == 3) {
        Some((k[0][0], k[1][1], k[0][2], k[1][2]))
    } else {
        None
    }
}

fn sphere(position: [f32; 3], size: f64, color: Color) -> SpherePrimitive {
    SpherePrimitive {
        pose: Pose {
            position: Vector3 {
                x: f64::from(position[0]),
                y: f64::from(position[1]),
                z: f64::from(position[2]),
            },
            orientation: Quaternion::default(),
        },
        size: Vector3 {
            x: size,
            y: size,
            z: size,
        },
        color,
    }
}

/// Lidar cloud to a capped set of green spheres.
fn lidar_entity(cloud: &PointMatrix, channel: &str, timestamp_us: i64) -> SceneEntity {
    let mut entity = SceneEntity::empty(
        Timestamp::from_micros(timestamp_us),
        VEHICLE_FRAME,
        channel,
        ENTITY_LIFETIME,
    );
    let n = cloud.points().min(LIDAR_MAX_POINTS);
    entity.spheres.reserve(n);
    for p in 0..n {
        entity
            .spheres
            .push(sphere(cloud.position(p), LIDAR_POINT_SIZE, color::LIDAR_COLOR));
    }
    entity
}

/// Radar cloud to RCS-colored spheres.
fn radar_entity(cloud: &PointMatrix, channel: &str, timestamp_us: i64) -> SceneEntity {
    let mut entity = SceneEntity::empty(
        Timestamp::from_micros(timestamp_us),
        VEHICLE_FRAME,
        channel,
        ENTITY_LIFETIME,
    );
    let n = cloud.points().min(RADAR_MAX_POINTS);
    entity.spheres.reserve(n);
    for p in 0..n {
        let rcs = cloud.get(RCS_CHANNEL, p);
        entity
            .spheres
            .push(sphere(cloud.position(p), RADAR_POINT_SIZE, color::rcs_color(rcs)));
    }
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn matrix(channels: usize, columns: &[Vec<f32>]) -> PointMatrix {
        let points = columns.len();
        let mut data = vec![0.0f32; channels * points];
        for (p, col) in columns.iter().enumerate() {
            for (c, &v) in col.iter().enumerate() {
                data[c * points + p] = v;
            }
        }
        PointMatrix::new(channels, points, data)
    }

    #[test]
    fn lidar_entity_caps_points_and_uses_green() {
        let columns: Vec<Vec<f32>> = (0..LIDAR_MAX_POINTS + 100)
            .map(|i| vec![i as f32, 0.0, 0.0, 1.0, 0.0])
            .collect();
        let entity = lidar_entity(&matrix(5, &columns), "LIDAR_LEFT", 1_000_000);
        assert_eq!(entity.spheres.len(), LIDAR_MAX_POINTS);
        assert_eq!(entity.id, "LIDAR_LEFT");
        let s = &entity.spheres[0];
        assert_eq!((s.color.r, s.color.g, s.color.b), (0.0, 1.0, 0.0));
        assert_eq!(s.size.x, LIDAR_POINT_SIZE);
    }

    #[test]
    fn radar_entity_colors_by_rcs_channel() {
        // One weak and one strong return.
        let weak = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, -20.0];
        let strong = vec![2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 30.0];
        let entity = radar_entity(&matrix(7, &[weak, strong]), "RADAR_LEFT_FRONT", 0);
        assert_eq!(entity.spheres.len(), 2);
        assert!(entity.spheres[0].color.b > entity.spheres[1].color.b);
        assert!(entity.spheres[1].color.r > entity.spheres[0].color.r);
        assert_eq!(entity.spheres[0].size.x, RADAR_POINT_SIZE);
    }

    #[test]
    fn calibration_prefers_dataset_intrinsics() {
        let sd = SampleData {
            token: "sd".into(),
            sample_token: "s".into(),
            ego_pose_token: "ep".into(),
            calibrated_sensor_token: "cs".into(),
            filename: "a.jpg".into(),
            fileformat: "jpg".into(),
            width: Some(2048),
            height: Some(1152),
            timestamp: 0,
            is_key_frame: true,
            prev: String::new(),
            next: String::new(),
        };
        let cal = CalibratedSensor {
            token: "cs".into(),
            sensor_token: "se".into(),
            translation: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
            camera_intrinsic: vec![
                vec![1234.0, 0.0, 1024.0],
                vec![0.0, 1250.0, 576.0],
                vec![0.0, 0.0, 1.0],
            ],
        };
        let body = camera_calibration(&sd, &cal, 0);
        assert_eq!(body.width, 2048);
        assert_eq!(body.k[0], 1234.0);
        assert_eq!(body.k[4], 1250.0);
        assert_eq!(body.k[2], 1024.0);
        assert_eq!(body.p[0], 1234.0);
    }

    #[test]
    fn calibration_falls_back_to_defaults() {
        let sd = SampleData {
            token: "sd".into(),
            sample_token: "s".into(),
            ego_pose_token: "ep".into(),
            calibrated_sensor_token: "cs".into(),
            filename: "a.jpg".into(),
            fileformat: "jpg".into(),
            width: None,
            height: None,
            timestamp: 0,
            is_key_frame: true,
            prev: String::new(),
            next: String::new(),
        };
        let cal = CalibratedSensor {
            token: "cs".into(),
            sensor_token: "se".into(),
            translation: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
            camera_intrinsic: Vec::new(),
        };
        let body = camera_calibration(&sd, &cal, 0);
        assert_eq!((body.width, body.height), (1920, 1080));
        assert_eq!(body.k[0], 1000.0);
        assert_eq!(body.k[2], 960.0);
    }

    #[test]
    fn image_format_normalizes_jpg() {
        assert_eq!(image_format("jpg"), "jpeg");
        assert_eq!(image_format("png"), "png");
    }

    #[test]
    fn short_category_name_takes_last_segment() {
        assert_eq!(short_category_name("vehicle.car"), "car");
        assert_eq!(short_category_name("movable_object"), "movable_object");
    }

    /// Two samples whose `next` pointers form a loop, no sensor data.
    fn write_cyclic_dataset(dir: &std::path::Path) {
        let version = dir.join("v1.1-test");
        fs::create_dir_all(&version).unwrap();

        let write = |table: &str, value: serde_json::Value| {
            fs::write(
                version.join(format!("{table}.json")),
                serde_json::to_vec(&value).unwrap(),
            )
            .unwrap();
        };

        write(
            "scene",
            json!([{
                "token": "sc0", "log_token": "log0", "nbr_samples": 2,
                "first_sample_token": "s0", "last_sample_token": "s1",
                "name": "scene-0001", "description": "looping chain"
            }]),
        );
        write(
            "sample",
            json!([
                {"token": "s0", "scene_token": "sc0", "timestamp": 1_700_000_000_000_000i64,
                 "prev": "", "next": "s1"},
                {"token": "s1", "scene_token": "sc0", "timestamp": 1_700_000_000_500_000i64,
                 "prev": "s0", "next": "s0"}
            ]),
        );
        for table in [
            "sample_data",
            "ego_pose",
            "calibrated_sensor",
            "sensor",
            "sample_annotation",
            "instance",
            "category",
        ] {
            write(table, json!([]));
        }
    }

    #[tokio::test]
    async fn stream_terminates_on_cyclic_sample_chain() {
        let dir = tempfile::tempdir().unwrap();
        write_cyclic_dataset(dir.path());
        let ts = TruckScenes::load(dir.path(), "v1.1-test").unwrap();

        let streamer = Streamer::new(
            ts,
            FoxgloveServer::new("test"),
            Arc::new(DevkitMetrics::new()),
        );
        let stop = AtomicBool::new(false);

        // A looping chain must end after at most the dataset's sample
        // count, well inside this deadline even with frame pacing.
        tokio::time::timeout(
            Duration::from_secs(10),
            streamer.stream(&["sc0".to_owned()], &stop),
        )
        .await
        .expect("walk did not terminate on a looping next chain")
        .unwrap();

        assert_eq!(streamer.metrics.frames_streamed_total.get(), 2);
    }
}
