//! Read-only dataset access.
//!
//! The fusion pipeline only needs four lookups plus a way to locate point
//! files, captured by the [`Dataset`] trait. [`RecordStore`] implements it
//! over in-memory token tables, which can be filled by hand or loaded from
//! the JSON tables of a nuScenes-style dataset:
//!
//! ```text
//! <root>/<version>/sample.json
//! <root>/<version>/sample_data.json
//! <root>/<version>/calibrated_sensor.json
//! <root>/<version>/sensor.json
//! <root>/<version>/ego_pose.json     (optional)
//! <root>/<version>/scene.json        (optional)
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::calibration::CalibrationTable;
use super::records::{
    CalibrationRecord, EgoPoseRecord, SampleRecord, SceneRecord, SensorDataRecord, SensorRecord,
};

/// Errors raised by dataset lookups and table loading.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("sample not found: {0}")]
    SampleNotFound(String),

    #[error("sensor data not found: {0}")]
    SensorDataNotFound(String),

    #[error("calibration not found: {0}")]
    CalibrationNotFound(String),

    #[error("ego pose not found: {0}")]
    EgoPoseNotFound(String),

    #[error("scene not found: {0}")]
    SceneNotFound(String),

    #[error("failed to open table '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse table '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Capability set the fusion core needs from a storage backend.
///
/// Implementations must be shareable across worker threads.
pub trait Dataset: Sync {
    fn get_sample(&self, token: &str) -> Result<&SampleRecord>;

    fn get_sensor_data(&self, token: &str) -> Result<&SensorDataRecord>;

    fn get_calibration(&self, token: &str) -> Result<&CalibrationRecord>;

    fn get_ego_pose(&self, token: &str) -> Result<&EgoPoseRecord>;

    /// Filesystem location of a sweep's point file.
    fn data_path(&self, record: &SensorDataRecord) -> PathBuf;
}

/// Token-indexed record tables rooted at a data directory.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    root: PathBuf,
    samples: HashMap<String, SampleRecord>,
    sensor_data: HashMap<String, SensorDataRecord>,
    calibrations: CalibrationTable,
    ego_poses: HashMap<String, EgoPoseRecord>,
    scenes: Vec<SceneRecord>,
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| DatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Like [`read_table`], but a missing file is an empty table.
fn read_optional_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if path.is_file() {
        read_table(path)
    } else {
        debug!("No table at {}", path.display());
        Ok(Vec::new())
    }
}

impl RecordStore {
    /// Creates an empty store whose point files resolve against `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load the JSON tables of `<root>/<version>`.
    ///
    /// Sensor data records are tagged with their channel and modality from the
    /// sensor table, and every sample's channel map is built from the
    /// key-frame sensor data attached to it.
    pub fn open<P: AsRef<Path>>(root: P, version: &str) -> Result<Self> {
        let root = root.as_ref();
        let table_dir = root.join(version);

        let samples: Vec<SampleRecord> = read_table(&table_dir.join("sample.json"))?;
        let sensor_data: Vec<SensorDataRecord> = read_table(&table_dir.join("sample_data.json"))?;
        let calibrations: Vec<CalibrationRecord> =
            read_table(&table_dir.join("calibrated_sensor.json"))?;
        let sensors: Vec<SensorRecord> = read_table(&table_dir.join("sensor.json"))?;

        let scenes: Vec<SceneRecord> = read_optional_table(&table_dir.join("scene.json"))?;
        let ego_poses: Vec<EgoPoseRecord> =
            read_optional_table(&table_dir.join("ego_pose.json"))?;

        let mut store = Self::new(root);
        store.calibrations = CalibrationTable::from_records(calibrations);
        store.scenes = scenes;
        for pose in ego_poses {
            store.insert_ego_pose(pose);
        }
        for sample in samples {
            store.insert_sample(sample);
        }

        let sensors: HashMap<String, SensorRecord> = sensors
            .into_iter()
            .map(|s| (s.token.clone(), s))
            .collect();

        for mut record in sensor_data {
            let sensor = store
                .calibrations
                .resolve(&record.calibrated_sensor_token)
                .ok()
                .and_then(|calib| sensors.get(&calib.sensor_token));

            match sensor {
                Some(sensor) => {
                    record.channel = sensor.channel.clone();
                    record.sensor_modality = sensor.modality.clone();
                }
                None => debug!(
                    "Sensor data {} has no resolvable sensor; keeping stored channel/modality",
                    record.token
                ),
            }
            store.insert_sensor_data(record);
        }

        info!(
            "Loaded {} samples, {} sweeps, {} calibrations, {} ego poses, {} scenes from {}",
            store.samples.len(),
            store.sensor_data.len(),
            store.calibrations.len(),
            store.ego_poses.len(),
            store.scenes.len(),
            table_dir.display()
        );

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn insert_sample(&mut self, sample: SampleRecord) {
        self.samples.insert(sample.token.clone(), sample);
    }

    /// Insert a sweep record. Key frames are also registered in their
    /// sample's channel map when the sample is already present.
    pub fn insert_sensor_data(&mut self, record: SensorDataRecord) {
        if record.is_key_frame && !record.channel.is_empty() {
            if let Some(sample) = self.samples.get_mut(&record.sample_token) {
                sample
                    .data
                    .insert(record.channel.clone(), record.token.clone());
            }
        }
        self.sensor_data.insert(record.token.clone(), record);
    }

    pub fn insert_calibration(&mut self, record: CalibrationRecord) {
        self.calibrations.insert(record);
    }

    pub fn insert_ego_pose(&mut self, pose: EgoPoseRecord) {
        self.ego_poses.insert(pose.token.clone(), pose);
    }

    pub fn insert_scene(&mut self, scene: SceneRecord) {
        self.scenes.push(scene);
    }

    pub fn scenes(&self) -> &[SceneRecord] {
        &self.scenes
    }

    /// Find a scene by name, token, or zero-based index.
    pub fn scene(&self, key: &str) -> Result<&SceneRecord> {
        self.scenes
            .iter()
            .find(|s| s.name == key || s.token == key)
            .or_else(|| key.parse::<usize>().ok().and_then(|i| self.scenes.get(i)))
            .ok_or_else(|| DatasetError::SceneNotFound(key.to_string()))
    }

    pub fn calibrations(&self) -> &CalibrationTable {
        &self.calibrations
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Dataset for RecordStore {
    fn get_sample(&self, token: &str) -> Result<&SampleRecord> {
        self.samples
            .get(token)
            .ok_or_else(|| DatasetError::SampleNotFound(token.to_string()))
    }

    fn get_sensor_data(&self, token: &str) -> Result<&SensorDataRecord> {
        self.sensor_data
            .get(token)
            .ok_or_else(|| DatasetError::SensorDataNotFound(token.to_string()))
    }

    fn get_calibration(&self, token: &str) -> Result<&CalibrationRecord> {
        self.calibrations
            .resolve(token)
            .map_err(|e| DatasetError::CalibrationNotFound(e.0))
    }

    fn get_ego_pose(&self, token: &str) -> Result<&EgoPoseRecord> {
        self.ego_poses
            .get(token)
            .ok_or_else(|| DatasetError::EgoPoseNotFound(token.to_string()))
    }

    fn data_path(&self, record: &SensorDataRecord) -> PathBuf {
        self.root.join(&record.filename)
    }
}
