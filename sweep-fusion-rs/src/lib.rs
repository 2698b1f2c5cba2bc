//! Multi-sensor point cloud fusion for driving datasets.
//!
//! This crate provides tools for:
//! - Walking the sample chain of a recording session
//! - Resolving per-sensor extrinsic calibrations
//! - Loading lidar and radar sweeps and moving them into the ego frame
//! - Merging every channel (and several past sweeps) into one cloud per sample
//!
//! # Example
//!
//! ```no_run
//! use sweep_fusion::{core::dataset::RecordStore, processors::fuse_sample, FusionParams};
//!
//! let store = RecordStore::open("./data", "v1.0-mini").unwrap();
//! let outcome = fuse_sample(&store, "sample-token", &FusionParams::default()).unwrap();
//! println!("{} points", outcome.cloud.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

#[cfg(test)]
mod test_utils;

pub use crate::config::{FusionConfig, FusionParams, OutputFormat};
pub use crate::core::loaders::PointCloud;
pub use crate::core::transforms::RigidTransform;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
