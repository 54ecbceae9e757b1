//! TruckScenes dataset core: table loading, token indexing and the query
//! facade the renderer and the Foxglove relay are built on.
//!
//! Tables live at `<dataroot>/<version>/<table>.json` and are immutable
//! after [`TruckScenes::load`]. Two derived indexes are built during load:
//! per-sample channel maps (`sample.data`, key frames only) and per-sample
//! annotation token lists (`sample.anns`).

mod records;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::records::{
    Attribute, CalibratedSensor, Category, EgoPose, Instance, Log, Sample, SampleAnnotation,
    SampleData, Scene, Sensor, Visibility,
};

#[derive(Debug, Error)]
pub enum DevkitError {
    #[error("data directory not found: {0}")]
    MissingDataroot(PathBuf),

    #[error("failed to read table {table} from {path}: {source}")]
    TableRead {
        table: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse table {table} from {path}: {source}")]
    TableParse {
        table: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("table {table} has no record with token {token}")]
    UnknownToken { table: &'static str, token: String },

    #[error("scene index {index} out of range (0-{max})")]
    SceneIndexOutOfRange { index: usize, max: usize },
}

/// Loaded dataset: the tables in file order plus token indexes.
#[derive(Debug)]
pub struct TruckScenes {
    pub dataroot: PathBuf,
    pub version: String,

    pub scenes: Vec<Scene>,
    pub samples: Vec<Sample>,
    pub sample_datas: Vec<SampleData>,
    pub ego_poses: Vec<EgoPose>,
    pub calibrated_sensors: Vec<CalibratedSensor>,
    pub sensors: Vec<Sensor>,
    pub sample_annotations: Vec<SampleAnnotation>,
    pub instances: Vec<Instance>,
    pub categories: Vec<Category>,
    pub attributes: Vec<Attribute>,
    pub visibilities: Vec<Visibility>,
    pub logs: Vec<Log>,

    scene_index: HashMap<String, usize>,
    sample_index: HashMap<String, usize>,
    sample_data_index: HashMap<String, usize>,
    ego_pose_index: HashMap<String, usize>,
    calibrated_sensor_index: HashMap<String, usize>,
    sensor_index: HashMap<String, usize>,
    sample_annotation_index: HashMap<String, usize>,
    instance_index: HashMap<String, usize>,
    category_index: HashMap<String, usize>,
}

fn token_index<T, F: Fn(&T) -> &str>(records: &[T], token_of: F) -> HashMap<String, usize> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (token_of(r).to_owned(), i))
        .collect()
}

fn load_table<T: serde::de::DeserializeOwned>(
    dir: &Path,
    table: &'static str,
    required: bool,
) -> Result<Vec<T>, DevkitError> {
    let path = dir.join(format!("{table}.json"));
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::warn!(table, path = %path.display(), "optional table missing, loading as empty");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(DevkitError::TableRead {
                table,
                path,
                source: e,
            })
        }
    };
    let records: Vec<T> =
        serde_json::from_slice(&bytes).map_err(|e| DevkitError::TableParse {
            table,
            path: path.clone(),
            source: e,
        })?;
    tracing::debug!(table, records = records.len(), "table loaded");
    Ok(records)
}

impl TruckScenes {
    /// Load all tables for `version` under `dataroot` and build indexes.
    pub fn load(
        dataroot: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Result<Self, DevkitError> {
        let dataroot = dataroot.into();
        let version = version.into();
        if !dataroot.is_dir() {
            return Err(DevkitError::MissingDataroot(dataroot));
        }
        let table_dir = dataroot.join(&version);

        let scenes: Vec<Scene> = load_table(&table_dir, "scene", true)?;
        let mut samples: Vec<Sample> = load_table(&table_dir, "sample", true)?;
        let sample_datas: Vec<SampleData> = load_table(&table_dir, "sample_data", true)?;
        let ego_poses: Vec<EgoPose> = load_table(&table_dir, "ego_pose", true)?;
        let calibrated_sensors: Vec<CalibratedSensor> =
            load_table(&table_dir, "calibrated_sensor", true)?;
        let sensors: Vec<Sensor> = load_table(&table_dir, "sensor", true)?;
        let sample_annotations: Vec<SampleAnnotation> =
            load_table(&table_dir, "sample_annotation", true)?;
        let instances: Vec<Instance> = load_table(&table_dir, "instance", true)?;
        let categories: Vec<Category> = load_table(&table_dir, "category", true)?;
        let attributes: Vec<Attribute> = load_table(&table_dir, "attribute", false)?;
        let visibilities: Vec<Visibility> = load_table(&table_dir, "visibility", false)?;
        let logs: Vec<Log> = load_table(&table_dir, "log", false)?;

        let sample_index = token_index(&samples, |s: &Sample| s.token.as_str());
        let calibrated_sensor_index =
            token_index(&calibrated_sensors, |c: &CalibratedSensor| c.token.as_str());
        let sensor_index = token_index(&sensors, |s: &Sensor| s.token.as_str());

        // Derived index: channel -> sample_data token, key frames only.
        for sd in &sample_datas {
            if !sd.is_key_frame {
                continue;
            }
            let Some(&si) = sample_index.get(&sd.sample_token) else {
                tracing::warn!(token = %sd.token, "sample_data references unknown sample");
                continue;
            };
            let channel = calibrated_sensor_index
                .get(&sd.calibrated_sensor_token)
                .map(|&ci| calibrated_sensors[ci].sensor_token.as_str())
                .and_then(|st| sensor_index.get(st))
                .map(|&i| sensors[i].channel.clone());
            match channel {
                Some(channel) => {
                    samples[si].data.insert(channel, sd.token.clone());
                }
                None => {
                    tracing::warn!(token = %sd.token, "sample_data has no resolvable sensor channel");
                }
            }
        }

        // Derived index: annotation tokens per sample, in table order.
        for ann in &sample_annotations {
            if let Some(&si) = sample_index.get(&ann.sample_token) {
                samples[si].anns.push(ann.token.clone());
            }
        }

        tracing::info!(
            version = %version,
            scenes = scenes.len(),
            samples = samples.len(),
            sample_datas = sample_datas.len(),
            annotations = sample_annotations.len(),
            "dataset loaded"
        );

        Ok(Self {
            scene_index: token_index(&scenes, |s: &Scene| s.token.as_str()),
            sample_data_index: token_index(&sample_datas, |s: &SampleData| s.token.as_str()),
            ego_pose_index: token_index(&ego_poses, |e: &EgoPose| e.token.as_str()),
            sample_annotation_index: token_index(&sample_annotations, |a: &SampleAnnotation| {
                a.token.as_str()
            }),
            instance_index: token_index(&instances, |i: &Instance| i.token.as_str()),
            category_index: token_index(&categories, |c: &Category| c.token.as_str()),
            sample_index,
            calibrated_sensor_index,
            sensor_index,
            dataroot,
            version,
            scenes,
            samples,
            sample_datas,
            ego_poses,
            calibrated_sensors,
            sensors,
            sample_annotations,
            instances,
            categories,
            attributes,
            visibilities,
            logs,
        })
    }

    fn lookup<'a, T>(
        records: &'a [T],
        index: &HashMap<String, usize>,
        table: &'static str,
        token: &str,
    ) -> Result<&'a T, DevkitError> {
        index
            .get(token)
            .map(|&i| &records[i])
            .ok_or_else(|| DevkitError::UnknownToken {
                table,
                token: token.to_owned(),
            })
    }

    pub fn scene(&self, token: &str) -> Result<&Scene, DevkitError> {
        Self::lookup(&self.scenes, &self.scene_index, "scene", token)
    }

    pub fn sample(&self, token: &str) -> Result<&Sample, DevkitError> {
        Self::lookup(&self.samples, &self.sample_index, "sample", token)
    }

    pub fn sample_data(&self, token: &str) -> Result<&SampleData, DevkitError> {
        Self::lookup(&self.sample_datas, &self.sample_data_index, "sample_data", token)
    }

    pub fn ego_pose(&self, token: &str) -> Result<&EgoPose, DevkitError> {
        Self::lookup(&self.ego_poses, &self.ego_pose_index, "ego_pose", token)
    }

    pub fn calibrated_sensor(&self, token: &str) -> Result<&CalibratedSensor, DevkitError> {
        Self::lookup(
            &self.calibrated_sensors,
            &self.calibrated_sensor_index,
            "calibrated_sensor",
            token,
        )
    }

    pub fn sensor(&self, token: &str) -> Result<&Sensor, DevkitError> {
        Self::lookup(&self.sensors, &self.sensor_index, "sensor", token)
    }

    pub fn sample_annotation(&self, token: &str) -> Result<&SampleAnnotation, DevkitError> {
        Self::lookup(
            &self.sample_annotations,
            &self.sample_annotation_index,
            "sample_annotation",
            token,
        )
    }

    pub fn instance(&self, token: &str) -> Result<&Instance, DevkitError> {
        Self::lookup(&self.instances, &self.instance_index, "instance", token)
    }

    pub fn category(&self, token: &str) -> Result<&Category, DevkitError> {
        Self::lookup(&self.categories, &self.category_index, "category", token)
    }

    /// Scene record by positional index, for the CLI's `--scene` flag.
    pub fn scene_at(&self, index: usize) -> Result<&Scene, DevkitError> {
        self.scenes
            .get(index)
            .ok_or(DevkitError::SceneIndexOutOfRange {
                index,
                max: self.scenes.len().saturating_sub(1),
            })
    }

    /// Absolute path of the file backing a `sample_data` record.
    pub fn sample_data_path(&self, token: &str) -> Result<PathBuf, DevkitError> {
        Ok(self.dataroot.join(&self.sample_data(token)?.filename))
    }

    /// Category of an annotation, via its instance.
    pub fn annotation_category(&self, ann: &SampleAnnotation) -> Result<&Category, DevkitError> {
        let instance = self.instance(&ann.instance_token)?;
        self.category(&instance.category_token)
    }

    /// Walk a scene's sample linked list from `first_sample_token`.
    ///
    /// The walk is bounded by the total sample count so a corrupt `next`
    /// chain terminates instead of spinning forever.
    pub fn scene_samples(&self, scene_token: &str) -> Result<Vec<&Sample>, DevkitError> {
        let scene = self.scene(scene_token)?;
        let mut out = Vec::with_capacity(scene.nbr_samples as usize);
        let mut token = scene.first_sample_token.clone();
        while !token.is_empty() {
            if out.len() >= self.samples.len() {
                tracing::warn!(scene = %scene_token, "sample linked list does not terminate, truncating walk");
                break;
            }
            let sample = self.sample(&token)?;
            token = sample.next.clone(); // empty string ends the chain
            out.push(sample);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    /// Two-sample scene with one camera, one lidar and one annotation.
    fn write_mini_dataset(dir: &Path) {
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
                "name": "scene-0001", "description": "test scene"
            }]),
        );
        write(
            "sample",
            json!([
                {"token": "s0", "scene_token": "sc0", "timestamp": 1_700_000_000_000_000i64,
                 "prev": "", "next": "s1"},
                {"token": "s1", "scene_token": "sc0", "timestamp": 1_700_000_000_500_000i64,
                 "prev": "s0", "next": ""}
            ]),
        );
        write(
            "sample_data",
            json!([
                {"token": "sd_cam", "sample_token": "s0", "ego_pose_token": "ep0",
                 "calibrated_sensor_token": "cs_cam", "filename": "sweeps/cam/0.jpg",
                 "fileformat": "jpg", "width": 1920, "height": 1080,
                 "timestamp": 1_700_000_000_000_000i64, "is_key_frame": true,
                 "prev": "", "next": ""},
                {"token": "sd_lidar", "sample_token": "s0", "ego_pose_token": "ep0",
                 "calibrated_sensor_token": "cs_lidar", "filename": "sweeps/lidar/0.pcd",
                 "fileformat": "pcd", "width": null, "height": null,
                 "timestamp": 1_700_000_000_000_000i64, "is_key_frame": true,
                 "prev": "", "next": ""},
                {"token": "sd_sweep", "sample_token": "s0", "ego_pose_token": "ep0",
                 "calibrated_sensor_token": "cs_lidar", "filename": "sweeps/lidar/0b.pcd",
                 "fileformat": "pcd", "timestamp": 1_700_000_000_100_000i64,
                 "is_key_frame": false, "prev": "", "next": ""}
            ]),
        );
        write(
            "ego_pose",
            json!([{
                "token": "ep0", "timestamp": 1_700_000_000_000_000i64,
                "translation": [100.0, 200.0, 0.5],
                "rotation": [1.0, 0.0, 0.0, 0.0]
            }]),
        );
        write(
            "calibrated_sensor",
            json!([
                {"token": "cs_cam", "sensor_token": "se_cam",
                 "translation": [1.5, 0.0, 2.0], "rotation": [1.0, 0.0, 0.0, 0.0],
                 "camera_intrinsic": [[1000.0, 0.0, 960.0], [0.0, 1000.0, 540.0], [0.0, 0.0, 1.0]]},
                {"token": "cs_lidar", "sensor_token": "se_lidar",
                 "translation": [0.0, 0.0, 3.0], "rotation": [1.0, 0.0, 0.0, 0.0],
                 "camera_intrinsic": []}
            ]),
        );
        write(
            "sensor",
            json!([
                {"token": "se_cam", "channel": "CAMERA_LEFT_FRONT", "modality": "camera"},
                {"token": "se_lidar", "channel": "LIDAR_LEFT", "modality": "lidar"}
            ]),
        );
        write(
            "sample_annotation",
            json!([{
                "token": "a0", "sample_token": "s0", "instance_token": "in0",
                "visibility_token": "", "attribute_tokens": [],
                "translation": [105.0, 200.0, 1.0], "size": [2.0, 5.0, 2.5],
                "rotation": [1.0, 0.0, 0.0, 0.0], "prev": "", "next": "",
                "num_lidar_pts": 40, "num_radar_pts": 3
            }]),
        );
        write(
            "instance",
            json!([{
                "token": "in0", "category_token": "cat0", "nbr_annotations": 1,
                "first_annotation_token": "a0", "last_annotation_token": "a0"
            }]),
        );
        write(
            "category",
            json!([{"token": "cat0", "name": "vehicle.truck", "description": ""}]),
        );
        // attribute/visibility/log deliberately absent: optional tables.
    }

    fn load_mini() -> (tempfile::TempDir, TruckScenes) {
        let dir = tempfile::tempdir().unwrap();
        write_mini_dataset(dir.path());
        let ts = TruckScenes::load(dir.path(), "v1.1-test").unwrap();
        (dir, ts)
    }

    #[test]
    fn load_builds_derived_indexes() {
        let (_dir, ts) = load_mini();
        assert_eq!(ts.scenes.len(), 1);
        assert_eq!(ts.samples.len(), 2);

        let s0 = ts.sample("s0").unwrap();
        // Key frames only: sd_sweep is not indexed.
        assert_eq!(s0.data.len(), 2);
        assert_eq!(s0.data["CAMERA_LEFT_FRONT"], "sd_cam");
        assert_eq!(s0.data["LIDAR_LEFT"], "sd_lidar");
        assert_eq!(s0.anns, vec!["a0".to_owned()]);

        let s1 = ts.sample("s1").unwrap();
        assert!(s1.data.is_empty());
        assert!(s1.anns.is_empty());
    }

    #[test]
    fn scene_samples_walks_linked_list() {
        let (_dir, ts) = load_mini();
        let walked = ts.scene_samples("sc0").unwrap();
        let tokens: Vec<&str> = walked.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, ["s0", "s1"]);
    }

    #[test]
    fn scene_samples_truncates_looping_chain() {
        let dir = tempfile::tempdir().unwrap();
        write_mini_dataset(dir.path());
        // Point s1 back at s0 so the chain never reaches an empty token.
        fs::write(
            dir.path().join("v1.1-test/sample.json"),
            serde_json::to_vec(&json!([
                {"token": "s0", "scene_token": "sc0", "timestamp": 1_700_000_000_000_000i64,
                 "prev": "", "next": "s1"},
                {"token": "s1", "scene_token": "sc0", "timestamp": 1_700_000_000_500_000i64,
                 "prev": "s0", "next": "s0"}
            ]))
            .unwrap(),
        )
        .unwrap();

        let ts = TruckScenes::load(dir.path(), "v1.1-test").unwrap();
        let walked = ts.scene_samples("sc0").unwrap();
        // Bounded by the total sample count, not spinning on the loop.
        let tokens: Vec<&str> = walked.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, ["s0", "s1"]);
    }

    #[test]
    fn sample_data_path_joins_dataroot() {
        let (dir, ts) = load_mini();
        let path = ts.sample_data_path("sd_cam").unwrap();
        assert_eq!(path, dir.path().join("sweeps/cam/0.jpg"));
    }

    #[test]
    fn annotation_category_resolves_instance_chain() {
        let (_dir, ts) = load_mini();
        let ann = ts.sample_annotation("a0").unwrap().clone();
        assert_eq!(ts.annotation_category(&ann).unwrap().name, "vehicle.truck");
    }

    #[test]
    fn unknown_token_is_an_error() {
        let (_dir, ts) = load_mini();
        let err = ts.sample("missing").unwrap_err();
        assert!(matches!(err, DevkitError::UnknownToken { table: "sample", .. }));
    }

    #[test]
    fn missing_dataroot_is_an_error() {
        let err = TruckScenes::load("/nonexistent/dataroot", "v1.1-test").unwrap_err();
        assert!(matches!(err, DevkitError::MissingDataroot(_)));
    }

    #[test]
    fn missing_required_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_mini_dataset(dir.path());
        fs::remove_file(dir.path().join("v1.1-test/category.json")).unwrap();
        let err = TruckScenes::load(dir.path(), "v1.1-test").unwrap_err();
        assert!(matches!(err, DevkitError::TableRead { table: "category", .. }));
    }

    #[test]
    fn scene_index_out_of_range() {
        let (_dir, ts) = load_mini();
        assert!(ts.scene_at(0).is_ok());
        assert!(matches!(
            ts.scene_at(7),
            Err(DevkitError::SceneIndexOutOfRange { index: 7, max: 0 })
        ));
    }
}
