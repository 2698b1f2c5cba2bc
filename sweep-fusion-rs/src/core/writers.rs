//! Writers for fused point clouds.
//!
//! Every format carries the merged layout `x y z intensity`:
//! - PCD v0.7, binary, through `pcd-rs`
//! - ASCII PLY
//! - CSV with a header row
//!
//! [`DirectorySink`] names one file per sample after its token and takes the
//! intensity from the cloud's [`INTENSITY_COLUMN`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use pcd_rs::{DataKind, DynRecord, Field, Schema, ValueKind, Writer, WriterInit};
use thiserror::Error;

use super::loaders::PointCloud;
use crate::config::OutputFormat;

/// Name of the auxiliary column written as `intensity`.
pub const INTENSITY_COLUMN: &str = "intensity";

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// PCD encoding error.
    #[error("PCD write error for '{path}': {source}")]
    PcdError {
        path: String,
        #[source]
        source: pcd_rs::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Intensity values of `cloud`, or zeros when it has no intensity column.
fn intensity_or_zeros(cloud: &PointCloud, intensity: Option<&[f32]>) -> Vec<f32> {
    match intensity {
        Some(values) if values.len() == cloud.len() => values.to_vec(),
        _ => vec![0.0; cloud.len()],
    }
}

/// Write point cloud to ASCII PLY with `x y z intensity` vertex properties.
///
/// Parent directories are created if needed.
///
/// # Example
///
/// ```no_run
/// use sweep_fusion::core::loaders::PointCloud;
/// use sweep_fusion::core::writers::write_ply;
/// use std::path::Path;
///
/// let cloud = PointCloud::default();
/// write_ply(Path::new("output.ply"), &cloud, None).unwrap();
/// ```
pub fn write_ply(path: &Path, cloud: &PointCloud, intensity: Option<&[f32]>) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    let path_str = path.display().to_string();
    let write_err = |e: std::io::Error| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    };

    write!(
        writer,
        "ply\nformat ascii 1.0\nelement vertex {}\n\
         property float x\nproperty float y\nproperty float z\n\
         property float intensity\nend_header\n",
        cloud.len()
    )
    .map_err(write_err)?;

    let intensity = intensity_or_zeros(cloud, intensity);
    for i in 0..cloud.len() {
        writeln!(
            writer,
            "{:.6} {:.6} {:.6} {:.6}",
            cloud.x[i], cloud.y[i], cloud.z[i], intensity[i]
        )
        .map_err(write_err)?;
    }

    writer.flush().map_err(write_err)?;

    Ok(())
}

/// Write point cloud to a binary PCD file with `x y z intensity` float fields.
pub fn write_pcd(path: &Path, cloud: &PointCloud, intensity: Option<&[f32]>) -> Result<()> {
    ensure_parent_dirs(path)?;

    let path_str = path.display().to_string();
    let pcd_err = |e: pcd_rs::Error| WriteError::PcdError {
        path: path_str.clone(),
        source: e,
    };

    let schema = Schema::from_iter([
        ("x", ValueKind::F32, 1),
        ("y", ValueKind::F32, 1),
        ("z", ValueKind::F32, 1),
        ("intensity", ValueKind::F32, 1),
    ]);

    let mut writer: Writer<DynRecord, _> = WriterInit {
        width: cloud.len() as u64,
        height: 1,
        viewpoint: Default::default(),
        data_kind: DataKind::Binary,
        schema: Some(schema),
    }
    .create(path)
    .map_err(pcd_err)?;

    let intensity = intensity_or_zeros(cloud, intensity);
    for i in 0..cloud.len() {
        let record = DynRecord(vec![
            Field::F32(vec![cloud.x[i]]),
            Field::F32(vec![cloud.y[i]]),
            Field::F32(vec![cloud.z[i]]),
            Field::F32(vec![intensity[i]]),
        ]);
        writer.push(&record).map_err(pcd_err)?;
    }

    writer.finish().map_err(pcd_err)?;

    Ok(())
}

/// Write point cloud to CSV with headers `x,y,z,intensity`.
pub fn write_cloud_csv(path: &Path, cloud: &PointCloud, intensity: Option<&[f32]>) -> Result<()> {
    ensure_parent_dirs(path)?;

    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();
    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    csv_writer
        .write_record(["x", "y", "z", "intensity"])
        .map_err(csv_err)?;

    let intensity = intensity_or_zeros(cloud, intensity);
    for i in 0..cloud.len() {
        csv_writer
            .write_record(&[
                format!("{:.6}", cloud.x[i]),
                format!("{:.6}", cloud.y[i]),
                format!("{:.6}", cloud.z[i]),
                format!("{:.6}", intensity[i]),
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;

    Ok(())
}

/// Destination for fused sample clouds.
pub trait CloudSink: Sync {
    /// Persist the merged cloud of one sample, returning where it went.
    fn write(&self, sample_token: &str, cloud: &PointCloud) -> Result<PathBuf>;
}

/// Writes each sample to `<dir>/<token>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    format: OutputFormat,
}

impl DirectorySink {
    pub fn new<P: Into<PathBuf>>(dir: P, format: OutputFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    /// Create the output directory up front so a bad path fails the run
    /// before any sample is fused.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| WriteError::CreateDirectory {
            path: self.dir.display().to_string(),
            source: e,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn path_for(&self, sample_token: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sample_token, self.format.extension()))
    }
}

impl CloudSink for DirectorySink {
    fn write(&self, sample_token: &str, cloud: &PointCloud) -> Result<PathBuf> {
        let path = self.path_for(sample_token);
        let intensity = cloud.column(INTENSITY_COLUMN);

        match self.format {
            OutputFormat::Pcd => write_pcd(&path, cloud, intensity)?,
            OutputFormat::Ply => write_ply(&path, cloud, intensity)?,
            OutputFormat::Csv => write_cloud_csv(&path, cloud, intensity)?,
        }

        debug!("Wrote {} points to {}", cloud.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{load_cartesian_csv, load_pcd};
    use std::fs;
    use tempfile::tempdir;

    fn create_test_cloud() -> PointCloud {
        PointCloud::from_xyz(
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        )
    }

    fn create_intensity_cloud() -> PointCloud {
        let mut cloud = PointCloud::with_columns(&[INTENSITY_COLUMN]);
        cloud.push(1.5, -2.0, 0.25, &[10.0]);
        cloud.push(-3.0, 4.0, 1.0, &[0.5]);
        cloud
    }

    #[test]
    fn test_write_ply_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ply");
        let cloud = create_test_cloud();

        write_ply(&path, &cloud, Some(&[1.0, 2.0, 3.0])).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "ply");
        assert_eq!(lines[1], "format ascii 1.0");
        assert_eq!(lines[2], "element vertex 3");
        assert_eq!(lines[6], "property float intensity");
        assert_eq!(lines[7], "end_header");
        assert_eq!(lines[8], "1.000000 4.000000 7.000000 1.000000");
        assert_eq!(lines.len(), 11);
    }

    #[test]
    fn test_write_ply_without_intensity_uses_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ply");

        write_ply(&path, &create_test_cloud(), None).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.lines().nth(8).unwrap().ends_with(" 0.000000"));
    }

    #[test]
    fn test_write_ply_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir").join("nested").join("test.ply");

        write_ply(&path, &create_test_cloud(), None).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_write_csv_readable_by_loader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.csv");
        let cloud = create_intensity_cloud();

        write_cloud_csv(&path, &cloud, cloud.column(INTENSITY_COLUMN)).unwrap();

        let loaded = load_cartesian_csv(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.x, vec![1.5, -3.0]);
        assert_eq!(loaded.column("intensity").unwrap(), &[10.0, 0.5]);
    }

    #[test]
    fn test_write_pcd_readable_by_loader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.pcd");
        let cloud = create_intensity_cloud();

        write_pcd(&path, &cloud, cloud.column(INTENSITY_COLUMN)).unwrap();

        let loaded = load_pcd(&path).unwrap();
        assert_eq!(loaded, cloud);
    }

    #[test]
    fn test_directory_sink_names_files_by_token() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let cloud = create_intensity_cloud();

        for format in [OutputFormat::Pcd, OutputFormat::Ply, OutputFormat::Csv] {
            let sink = DirectorySink::new(&out, format);
            let path = sink.write("tok42", &cloud).unwrap();

            assert_eq!(path, out.join(format!("tok42.{}", format.extension())));
            assert!(path.is_file());
        }
    }

    #[test]
    fn test_directory_sink_writes_intensity_column() {
        let dir = tempdir().unwrap();
        let sink = DirectorySink::new(dir.path(), OutputFormat::Csv);

        let path = sink.write("tok", &create_intensity_cloud()).unwrap();
        let loaded = load_cartesian_csv(&path).unwrap();
        assert_eq!(loaded.column("intensity").unwrap(), &[10.0, 0.5]);

        // Clouds without the column are written with zero intensity
        let path = sink.write("bare", &create_test_cloud()).unwrap();
        let loaded = load_cartesian_csv(&path).unwrap();
        assert_eq!(loaded.column("intensity").unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_directory_sink_prepare_fails_under_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let sink = DirectorySink::new(blocker.join("out"), OutputFormat::Pcd);
        assert!(matches!(
            sink.prepare(),
            Err(WriteError::CreateDirectory { .. })
        ));
    }
}
