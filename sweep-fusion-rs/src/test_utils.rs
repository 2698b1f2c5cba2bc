//! Fixtures shared by unit tests: record builders and on-disk sweep files.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::core::records::{
    CalibrationRecord, EgoPoseRecord, SampleRecord, SensorDataRecord, SensorModality,
};

pub const LIDAR_FIELDS: &[&str] = &["x", "y", "z", "intensity"];
pub const RADAR_FIELDS: &[&str] = &["x", "y", "z", "vrel_x", "vrel_y", "vrel_z", "rcs"];

pub const IDENTITY_ROTATION: [f64; 4] = [1.0, 0.0, 0.0, 0.0];

/// Write an ASCII PCD file with all-float fields.
pub fn write_ascii_pcd(path: &Path, fields: &[&str], rows: &[Vec<f32>]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = File::create(path).unwrap();
    writeln!(file, "# .PCD v0.7 - Point Cloud Data file format").unwrap();
    writeln!(file, "VERSION 0.7").unwrap();
    writeln!(file, "FIELDS {}", fields.join(" ")).unwrap();
    writeln!(file, "SIZE {}", vec!["4"; fields.len()].join(" ")).unwrap();
    writeln!(file, "TYPE {}", vec!["F"; fields.len()].join(" ")).unwrap();
    writeln!(file, "COUNT {}", vec!["1"; fields.len()].join(" ")).unwrap();
    writeln!(file, "WIDTH {}", rows.len()).unwrap();
    writeln!(file, "HEIGHT 1").unwrap();
    writeln!(file, "VIEWPOINT 0 0 0 1 0 0 0").unwrap();
    writeln!(file, "POINTS {}", rows.len()).unwrap();
    writeln!(file, "DATA ascii").unwrap();
    for row in rows {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{}", line.join(" ")).unwrap();
    }
}

/// `n` lidar rows on the x axis at `distance`, with intensity equal to the index.
pub fn lidar_rows(n: usize, distance: f32) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| vec![distance, 0.0, 0.0, i as f32])
        .collect()
}

pub fn sample(token: &str, next: Option<&str>) -> SampleRecord {
    SampleRecord {
        token: token.to_string(),
        prev: None,
        next: next.map(str::to_string),
        timestamp: 0,
        scene_token: "scene".to_string(),
        data: BTreeMap::new(),
    }
}

pub fn calibration(token: &str, translation: [f64; 3], rotation: [f64; 4]) -> CalibrationRecord {
    CalibrationRecord {
        token: token.to_string(),
        sensor_token: format!("sensor-{token}"),
        translation,
        rotation,
    }
}

pub fn ego_pose(token: &str, translation: [f64; 3], rotation: [f64; 4]) -> EgoPoseRecord {
    EgoPoseRecord {
        token: token.to_string(),
        translation,
        rotation,
        timestamp: 0,
    }
}

/// A key-frame sweep record; use struct update syntax to tweak it.
pub fn sweep(
    token: &str,
    sample_token: &str,
    channel: &str,
    modality: SensorModality,
    calibration_token: &str,
    filename: &str,
) -> SensorDataRecord {
    SensorDataRecord {
        token: token.to_string(),
        sample_token: sample_token.to_string(),
        calibrated_sensor_token: calibration_token.to_string(),
        filename: filename.to_string(),
        sensor_modality: modality,
        channel: channel.to_string(),
        prev: None,
        next: None,
        timestamp: 0,
        is_key_frame: true,
        ego_pose_token: None,
    }
}
