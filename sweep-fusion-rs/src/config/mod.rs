//! Configuration types for the fusion pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading or writing a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Location of the dataset tables and point files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset root; point file names are relative to it
    #[serde(default = "default_dataset_root")]
    pub root: PathBuf,

    /// Table directory under the root (e.g. "v1.0-mini")
    #[serde(default = "default_dataset_version")]
    pub version: String,
}

fn default_dataset_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_dataset_version() -> String {
    "v1.0-mini".to_string()
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: default_dataset_root(),
            version: default_dataset_version(),
        }
    }
}

/// Parameters of per-sample fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    /// Sensor channels to fuse
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Reference channel; must be one of `channels`. All channels are still
    /// fused into the ego frame through their own calibrations.
    #[serde(default = "default_ref_channel")]
    pub ref_channel: String,

    /// Number of sweeps aggregated per channel (keyframe included)
    #[serde(default = "default_nsweeps")]
    pub nsweeps: usize,

    /// Points within this radius of the sensor origin are dropped (meters)
    #[serde(default = "default_min_distance")]
    pub min_distance: f32,
}

fn default_channels() -> Vec<String> {
    [
        "LIDAR_LEFT",
        "LIDAR_REAR",
        "LIDAR_RIGHT",
        "LIDAR_TOP_FRONT",
        "LIDAR_TOP_LEFT",
        "LIDAR_TOP_RIGHT",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_ref_channel() -> String {
    "LIDAR_LEFT".to_string()
}

fn default_nsweeps() -> usize {
    5
}

fn default_min_distance() -> f32 {
    1.0
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            ref_channel: default_ref_channel(),
            nsweeps: default_nsweeps(),
            min_distance: default_min_distance(),
        }
    }
}

/// File format of fused clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pcd,
    Ply,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pcd => "pcd",
            OutputFormat::Ply => "ply",
            OutputFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where and how fused clouds are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output_pointclouds")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: OutputFormat::default(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads (None = one per core)
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Main configuration combining all sub-configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub dataset: DatasetConfig,

    #[serde(default)]
    pub fusion: FusionParams,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl FusionConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
