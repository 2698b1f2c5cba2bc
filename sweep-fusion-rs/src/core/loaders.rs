//! Sweep loaders for lidar and radar point files.
//!
//! This module provides:
//! - The column-oriented [`PointCloud`] container shared by the whole pipeline
//! - A strict PCD reader (ascii, binary and binary_compressed via `pcd-rs`)
//! - A Cartesian CSV reader (x, y, z plus any extra numeric columns)
//! - [`load_sweep`], the lenient entry point used during fusion, which turns a
//!   missing or unreadable file into an empty cloud plus a missing-file signal

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::warn;
use pcd_rs::{DynReader, DynRecord, Field};
use thiserror::Error;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("PCD parsing error: {0}")]
    Pcd(#[from] pcd_rs::Error),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Unsupported point file extension: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// A named per-point channel carried alongside the spatial columns.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxColumn {
    pub name: String,
    pub values: Vec<f32>,
}

/// Container for 3D point cloud data.
///
/// Spatial columns are stored separately from the auxiliary ones so that a
/// rigid transform can rewrite `x`, `y`, `z` without touching the rest. In
/// "full-row" indexing, columns 0..3 are `x`, `y`, `z` and column `3 + i`
/// is `aux[i]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    /// X coordinates of all points.
    pub x: Vec<f32>,
    /// Y coordinates of all points.
    pub y: Vec<f32>,
    /// Z coordinates of all points.
    pub z: Vec<f32>,
    /// Auxiliary columns in file order.
    pub aux: Vec<AuxColumn>,
}

impl PointCloud {
    /// Creates a new empty point cloud with no auxiliary columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for new() - creates an empty point cloud.
    #[inline]
    pub fn empty() -> Self {
        Self::new()
    }

    /// Creates an empty point cloud with the given auxiliary column names.
    pub fn with_columns<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            aux: names
                .iter()
                .map(|name| AuxColumn {
                    name: name.as_ref().to_string(),
                    values: Vec::new(),
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Creates a new point cloud from coordinate vectors.
    pub fn from_xyz(x: Vec<f32>, y: Vec<f32>, z: Vec<f32>) -> Self {
        Self {
            x,
            y,
            z,
            aux: Vec::new(),
        }
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Names of the auxiliary columns, in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.aux.iter().map(|c| c.name.as_str()).collect()
    }

    /// Looks up an auxiliary column by name.
    pub fn column(&self, name: &str) -> Option<&[f32]> {
        self.aux
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Looks up a column by full-row index (0..3 are the spatial columns).
    pub fn column_at(&self, index: usize) -> Option<&[f32]> {
        match index {
            0 => Some(&self.x),
            1 => Some(&self.y),
            2 => Some(&self.z),
            i => self.aux.get(i - 3).map(|c| c.values.as_slice()),
        }
    }

    /// Adds a point. `aux` must hold one value per auxiliary column; missing
    /// trailing values are filled with 0.0.
    pub fn push(&mut self, x: f32, y: f32, z: f32, aux: &[f32]) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        for (i, column) in self.aux.iter_mut().enumerate() {
            column.values.push(aux.get(i).copied().unwrap_or(0.0));
        }
    }

    /// Converts point cloud to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        (0..self.len())
            .map(|i| [self.x[i], self.y[i], self.z[i]])
            .collect()
    }

    /// Returns a new cloud holding only the points whose mask entry is true.
    pub fn select(&self, keep: &[bool]) -> PointCloud {
        debug_assert_eq!(keep.len(), self.len(), "mask length must match cloud");

        let pick = |values: &[f32]| -> Vec<f32> {
            values
                .iter()
                .zip(keep)
                .filter_map(|(&v, &k)| k.then_some(v))
                .collect()
        };

        PointCloud {
            x: pick(&self.x),
            y: pick(&self.y),
            z: pick(&self.z),
            aux: self
                .aux
                .iter()
                .map(|c| AuxColumn {
                    name: c.name.clone(),
                    values: pick(&c.values),
                })
                .collect(),
        }
    }
}

/// Reads a single numeric value out of a PCD field, widening to f32.
fn field_value(field: &Field) -> f32 {
    match field {
        Field::I8(v) => v.first().map_or(0.0, |&x| x as f32),
        Field::I16(v) => v.first().map_or(0.0, |&x| x as f32),
        Field::I32(v) => v.first().map_or(0.0, |&x| x as f32),
        Field::U8(v) => v.first().map_or(0.0, |&x| x as f32),
        Field::U16(v) => v.first().map_or(0.0, |&x| x as f32),
        Field::U32(v) => v.first().map_or(0.0, |&x| x as f32),
        Field::F32(v) => v.first().copied().unwrap_or(0.0),
        Field::F64(v) => v.first().map_or(0.0, |&x| x as f32),
    }
}

/// Load a point cloud from a PCD file.
///
/// The `x`, `y` and `z` fields are required. Every other field becomes an
/// auxiliary column in header order, so a lidar file with
/// `x y z intensity` yields one auxiliary column while a radar file with
/// `x y z vrel_x vrel_y vrel_z rcs` yields four.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, is not a valid PCD file, or
/// lacks one of the spatial fields.
pub fn load_pcd<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let reader = DynReader::open(path)?;

    let meta = reader.meta();
    let field_names: Vec<String> = meta
        .field_defs
        .fields
        .iter()
        .map(|f| f.name.clone())
        .collect();
    let capacity = meta.num_points as usize;

    let find = |name: &str| {
        field_names
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))
    };
    let x_idx = find("x")?;
    let y_idx = find("y")?;
    let z_idx = find("z")?;

    let aux_idx: Vec<usize> = (0..field_names.len())
        .filter(|i| ![x_idx, y_idx, z_idx].contains(i))
        .collect();
    let aux_names: Vec<&str> = aux_idx.iter().map(|&i| field_names[i].as_str()).collect();

    let mut cloud = PointCloud::with_columns(&aux_names);
    cloud.x.reserve(capacity);
    cloud.y.reserve(capacity);
    cloud.z.reserve(capacity);

    let mut aux_row = vec![0.0f32; aux_idx.len()];
    for record in reader {
        let DynRecord(fields) = record?;

        for (slot, &i) in aux_row.iter_mut().zip(&aux_idx) {
            *slot = field_value(&fields[i]);
        }
        cloud.push(
            field_value(&fields[x_idx]),
            field_value(&fields[y_idx]),
            field_value(&fields[z_idx]),
            &aux_row,
        );
    }

    Ok(cloud)
}

/// Load a Cartesian point cloud from a CSV file with x, y, z columns.
///
/// The CSV should have a header row with column names. Columns named `x`,
/// `y`, `z` (case-insensitive) are the spatial columns; every other column is
/// kept as an auxiliary column. Unparsable cells read as 0.0.
pub fn load_cartesian_csv<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    // Get headers and map to lowercase
    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect();

    let find = |name: &str| {
        col_map
            .get(name)
            .copied()
            .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))
    };
    let x_idx = find("x")?;
    let y_idx = find("y")?;
    let z_idx = find("z")?;

    let aux_idx: Vec<usize> = (0..headers.len())
        .filter(|i| ![x_idx, y_idx, z_idx].contains(i))
        .collect();
    let aux_names: Vec<&str> = aux_idx
        .iter()
        .filter_map(|&i| headers.get(i))
        .map(str::trim)
        .collect();

    let mut cloud = PointCloud::with_columns(&aux_names);
    let parse = |record: &csv::StringRecord, idx: usize| -> f32 {
        record
            .get(idx)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0.0)
    };

    let mut aux_row = vec![0.0f32; aux_idx.len()];
    for result in reader.records() {
        let record = result?;

        for (slot, &i) in aux_row.iter_mut().zip(&aux_idx) {
            *slot = parse(&record, i);
        }
        cloud.push(
            parse(&record, x_idx),
            parse(&record, y_idx),
            parse(&record, z_idx),
            &aux_row,
        );
    }

    Ok(cloud)
}

/// Load points from a file, dispatching on its extension (`.pcd` or `.csv`).
pub fn load_points<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("pcd") => load_pcd(path),
        Some("csv") => load_cartesian_csv(path),
        _ => Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Outcome of a lenient sweep load.
#[derive(Debug, Clone)]
pub struct LoadedSweep {
    /// Loaded points; empty when the file was missing or unreadable.
    pub cloud: PointCloud,
    /// Set to the offending path when the file was missing or unreadable.
    pub missing: Option<PathBuf>,
}

impl LoadedSweep {
    fn missing(path: &Path) -> Self {
        Self {
            cloud: PointCloud::empty(),
            missing: Some(path.to_path_buf()),
        }
    }
}

/// Load a sweep, never failing.
///
/// Missing sweeps are expected in partially recorded sessions, so a path that
/// does not exist or cannot be parsed yields an empty cloud and a populated
/// [`LoadedSweep::missing`] instead of an error. The existence check happens
/// before any read.
pub fn load_sweep(path: &Path) -> LoadedSweep {
    if !path.is_file() {
        warn!("Point cloud file not found: {}", path.display());
        return LoadedSweep::missing(path);
    }

    match load_points(path) {
        Ok(cloud) => LoadedSweep {
            cloud,
            missing: None,
        },
        Err(e) => {
            warn!("Failed to read point cloud {}: {}", path.display(), e);
            LoadedSweep::missing(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{write_ascii_pcd, LIDAR_FIELDS, RADAR_FIELDS};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_point_cloud_operations() {
        let mut cloud = PointCloud::with_columns(&["intensity"]);
        assert!(cloud.is_empty());

        cloud.push(1.0, 2.0, 3.0, &[10.0]);
        cloud.push(4.0, 5.0, 6.0, &[20.0]);

        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.to_coords(), vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(cloud.column("intensity"), Some(&[10.0, 20.0][..]));
        assert_eq!(cloud.column_at(3), Some(&[10.0, 20.0][..]));
        assert_eq!(cloud.column_at(1), Some(&[2.0, 5.0][..]));
        assert!(cloud.column_at(4).is_none());
    }

    #[test]
    fn test_select_keeps_columns_aligned() {
        let mut cloud = PointCloud::with_columns(&["intensity"]);
        cloud.push(1.0, 0.0, 0.0, &[1.0]);
        cloud.push(2.0, 0.0, 0.0, &[2.0]);
        cloud.push(3.0, 0.0, 0.0, &[3.0]);

        let picked = cloud.select(&[true, false, true]);
        assert_eq!(picked.x, vec![1.0, 3.0]);
        assert_eq!(picked.column("intensity"), Some(&[1.0, 3.0][..]));
    }

    #[test]
    fn test_load_ascii_pcd_lidar() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lidar.pcd");
        write_ascii_pcd(
            &path,
            LIDAR_FIELDS,
            &[vec![1.0, 2.0, 3.0, 0.5], vec![4.0, 5.0, 6.0, 0.25]],
        );

        let cloud = load_pcd(&path)?;
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.x, vec![1.0, 4.0]);
        assert_eq!(cloud.column("intensity"), Some(&[0.5, 0.25][..]));
        Ok(())
    }

    #[test]
    fn test_load_ascii_pcd_radar_columns() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("radar.pcd");
        write_ascii_pcd(
            &path,
            RADAR_FIELDS,
            &[vec![1.0, 0.0, 0.0, 0.1, 0.2, 0.3, 7.5]],
        );

        let cloud = load_pcd(&path)?;
        assert_eq!(cloud.aux.len(), 4);
        assert_eq!(cloud.column_at(6), Some(&[7.5][..]));
        Ok(())
    }

    #[test]
    fn test_load_cartesian_csv() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "x,y,z,intensity").unwrap();
        writeln!(file, "1.0,2.0,3.0,9.0").unwrap();
        writeln!(file, "4.0,5.0,6.0,8.0").unwrap();
        file.flush().unwrap();

        let cloud = load_points(file.path())?;
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.y, vec![2.0, 5.0]);
        assert_eq!(cloud.column("intensity"), Some(&[9.0, 8.0][..]));
        Ok(())
    }

    #[test]
    fn test_load_cartesian_csv_missing_columns() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b,c").unwrap();
        writeln!(file, "1,2,3").unwrap();
        file.flush().unwrap();

        let result = load_cartesian_csv(file.path());
        assert!(matches!(result, Err(LoaderError::MissingColumns(_))));
    }

    #[test]
    fn test_load_sweep_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.pcd");

        let sweep = load_sweep(&path);
        assert!(sweep.cloud.is_empty());
        assert_eq!(sweep.missing, Some(path));
    }

    #[test]
    fn test_load_sweep_unreadable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.pcd");
        std::fs::write(&path, b"not a point cloud").unwrap();

        let sweep = load_sweep(&path);
        assert!(sweep.cloud.is_empty());
        assert!(sweep.missing.is_some());
    }

    #[test]
    fn test_load_points_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        assert!(matches!(
            load_points(file.path()),
            Err(LoaderError::UnsupportedFormat(_))
        ));
    }
}
