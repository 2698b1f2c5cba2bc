//! Per-sample multi-sensor fusion.
//!
//! For one sample, every requested channel is resolved to its keyframe sweep,
//! optionally extended with earlier sweeps of the same sensor, filtered for
//! near-origin returns, moved into the ego frame with its own extrinsic
//! calibration, and concatenated into a single [`MergedPointCloud`].
//!
//! Earlier sweeps are motion compensated: their points go through the global
//! frame into the ego frame of the keyframe, using the ego pose recorded with
//! each sweep.
//!
//! Channel-level problems never abort a sample: they are collected as
//! [`FusionWarning`]s next to whatever points could be fused. Only a missing
//! sample is an error.

use std::path::PathBuf;

use log::{debug, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::FusionParams;
use crate::core::dataset::Dataset;
use crate::core::loaders::{load_sweep, AuxColumn, PointCloud};
use crate::core::records::{SampleRecord, SensorDataRecord, SensorModality};
use crate::core::transforms::{remove_close, transform_cloud, RigidTransform, TransformError};

pub use crate::core::writers::INTENSITY_COLUMN;

/// Fatal errors for a single sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("sample not found: {0}")]
    SampleNotFound(String),

    #[error("invalid fusion parameters: {0}")]
    InvalidParams(String),
}

/// Recoverable conditions met while fusing a sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionWarning {
    #[error("channel {channel} has no data in this sample")]
    ChannelNotInSample { channel: String },

    #[error("channel {channel}: sensor data {token} not found")]
    SensorDataNotFound { channel: String, token: String },

    #[error("channel {channel}: unsupported modality '{modality}'")]
    UnsupportedModality {
        channel: String,
        modality: SensorModality,
    },

    #[error("channel {channel}: calibration {token} not found")]
    CalibrationNotFound { channel: String, token: String },

    #[error("channel {channel}: invalid calibration {token}: {reason}")]
    InvalidCalibration {
        channel: String,
        token: String,
        reason: TransformError,
    },

    #[error("channel {channel}: ego pose {token} not found")]
    EgoPoseNotFound { channel: String, token: String },

    #[error("channel {channel}: invalid ego pose {token}: {reason}")]
    InvalidEgoPose {
        channel: String,
        token: String,
        reason: TransformError,
    },

    #[error("channel {channel}: point cloud missing at {}", .path.display())]
    PointCloudMissing { channel: String, path: PathBuf },

    #[error("channel {channel}: no points left after filtering")]
    ChannelEmpty { channel: String },

    #[error("sample {sample}: no points fused from any channel")]
    EmptyFusionResult { sample: String },
}

impl FusionWarning {
    /// Stable short name used for grouping in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            FusionWarning::ChannelNotInSample { .. } => "ChannelNotInSample",
            FusionWarning::SensorDataNotFound { .. } => "SensorDataNotFound",
            FusionWarning::UnsupportedModality { .. } => "UnsupportedModality",
            FusionWarning::CalibrationNotFound { .. } => "CalibrationNotFound",
            FusionWarning::InvalidCalibration { .. } => "InvalidCalibration",
            FusionWarning::EgoPoseNotFound { .. } => "EgoPoseNotFound",
            FusionWarning::InvalidEgoPose { .. } => "InvalidEgoPose",
            FusionWarning::PointCloudMissing { .. } => "PointCloudMissing",
            FusionWarning::ChannelEmpty { .. } => "ChannelEmpty",
            FusionWarning::EmptyFusionResult { .. } => "EmptyFusionResult",
        }
    }
}

/// Points contributed by one channel to a merged cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelContribution {
    pub channel: String,
    pub modality: SensorModality,
    /// Sweeps whose point file was actually read.
    pub sweeps: usize,
    pub points: usize,
}

/// All channels of one sample in the ego frame.
///
/// `cloud` carries `x`, `y`, `z` and one [`INTENSITY_COLUMN`] auxiliary column.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPointCloud {
    pub cloud: PointCloud,
    pub contributions: Vec<ChannelContribution>,
}

impl MergedPointCloud {
    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    pub fn intensity(&self) -> &[f32] {
        self.cloud.column(INTENSITY_COLUMN).unwrap_or(&[])
    }
}

/// Result of fusing one sample.
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub sample_token: String,
    pub cloud: MergedPointCloud,
    pub warnings: Vec<FusionWarning>,
}

impl FusionOutcome {
    /// True when no channel produced any point. A warning of kind
    /// `EmptyFusionResult` is always present in that case.
    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    /// Number of channels that contributed at least one point.
    pub fn channels_fused(&self) -> usize {
        self.cloud
            .contributions
            .iter()
            .filter(|c| c.points > 0)
            .count()
    }
}

struct ChannelResult {
    fused: Option<(ChannelContribution, PointCloud)>,
    warnings: Vec<FusionWarning>,
}

impl ChannelResult {
    fn skipped(warning: FusionWarning) -> Self {
        warn!("{}", warning);
        Self {
            fused: None,
            warnings: vec![warning],
        }
    }
}

/// Reduce a transformed sweep to `x y z intensity`, picking the intensity from
/// the modality's column (zeros when the file does not carry it).
fn with_intensity(cloud: PointCloud, modality: &SensorModality) -> PointCloud {
    let intensity = modality
        .intensity_column()
        .filter(|&i| i >= 3)
        .and_then(|i| cloud.column_at(i))
        .map(<[f32]>::to_vec)
        .unwrap_or_else(|| vec![0.0; cloud.len()]);

    let mut out = PointCloud::from_xyz(cloud.x, cloud.y, cloud.z);
    out.aux.push(AuxColumn {
        name: INTENSITY_COLUMN.to_string(),
        values: intensity,
    });
    out
}

/// Row-stack two clouds that both carry the `x y z intensity` layout.
fn extend_fused(dst: &mut PointCloud, src: PointCloud) {
    dst.x.extend(src.x);
    dst.y.extend(src.y);
    dst.z.extend(src.z);
    if let (Some(column), Some(incoming)) = (dst.aux.first_mut(), src.aux.into_iter().next()) {
        column.values.extend(incoming.values);
    }
}

/// Fuses samples of one dataset with fixed parameters.
pub struct SampleFusion<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    params: &'a FusionParams,
}

impl<'a, D: Dataset + ?Sized> SampleFusion<'a, D> {
    /// Checks the parameters once up front.
    pub fn new(dataset: &'a D, params: &'a FusionParams) -> Result<Self, FusionError> {
        if params.channels.is_empty() {
            return Err(FusionError::InvalidParams("no channels requested".into()));
        }
        if params.nsweeps == 0 {
            return Err(FusionError::InvalidParams("nsweeps must be at least 1".into()));
        }
        if !params.min_distance.is_finite() || params.min_distance < 0.0 {
            return Err(FusionError::InvalidParams(format!(
                "min_distance must be a non-negative number, got {}",
                params.min_distance
            )));
        }
        if !params.channels.contains(&params.ref_channel) {
            return Err(FusionError::InvalidParams(format!(
                "reference channel {} is not among the requested channels",
                params.ref_channel
            )));
        }
        Ok(Self { dataset, params })
    }

    pub fn params(&self) -> &FusionParams {
        self.params
    }

    /// Fuse every requested channel of one sample into the ego frame.
    ///
    /// Channels are processed in parallel; contributions and warnings are
    /// reported in the order the channels were requested.
    pub fn fuse_sample(&self, sample_token: &str) -> Result<FusionOutcome, FusionError> {
        let sample = self
            .dataset
            .get_sample(sample_token)
            .map_err(|_| FusionError::SampleNotFound(sample_token.to_string()))?;

        let results: Vec<ChannelResult> = self
            .params
            .channels
            .par_iter()
            .map(|channel| self.fuse_channel(sample, channel))
            .collect();

        let total: usize = results
            .iter()
            .filter_map(|r| r.fused.as_ref())
            .map(|(c, _)| c.points)
            .sum();

        let mut cloud = PointCloud::with_columns(&[INTENSITY_COLUMN]);
        cloud.x.reserve(total);
        cloud.y.reserve(total);
        cloud.z.reserve(total);

        let mut contributions = Vec::with_capacity(results.len());
        let mut warnings = Vec::new();
        for result in results {
            warnings.extend(result.warnings);
            if let Some((contribution, points)) = result.fused {
                extend_fused(&mut cloud, points);
                contributions.push(contribution);
            }
        }

        if cloud.is_empty() {
            let warning = FusionWarning::EmptyFusionResult {
                sample: sample_token.to_string(),
            };
            warn!("{}", warning);
            warnings.push(warning);
        }

        debug!(
            "Sample {}: {} points from {} channels, {} warnings",
            sample_token,
            cloud.len(),
            contributions.iter().filter(|c| c.points > 0).count(),
            warnings.len()
        );

        Ok(FusionOutcome {
            sample_token: sample_token.to_string(),
            cloud: MergedPointCloud {
                cloud,
                contributions,
            },
            warnings,
        })
    }

    /// Resolve the sweeps to aggregate: the keyframe and up to `nsweeps - 1`
    /// earlier sweeps of the same sensor, newest first.
    fn collect_sweeps<'r>(&'r self, keyframe: &'r SensorDataRecord) -> Vec<&'r SensorDataRecord> {
        let mut sweeps = vec![keyframe];
        let mut current = keyframe;

        while sweeps.len() < self.params.nsweeps {
            let Some(prev) = current.prev.as_deref() else {
                break;
            };
            match self.dataset.get_sensor_data(prev) {
                Ok(record) => {
                    sweeps.push(record);
                    current = record;
                }
                Err(e) => {
                    debug!("Stopping sweep aggregation for {}: {}", keyframe.channel, e);
                    break;
                }
            }
        }

        sweeps
    }

    fn resolve_transform(
        &self,
        channel: &str,
        record: &SensorDataRecord,
    ) -> Result<RigidTransform, FusionWarning> {
        let token = &record.calibrated_sensor_token;
        let calibration =
            self.dataset
                .get_calibration(token)
                .map_err(|_| FusionWarning::CalibrationNotFound {
                    channel: channel.to_string(),
                    token: token.clone(),
                })?;

        calibration
            .rigid_transform()
            .map_err(|reason| FusionWarning::InvalidCalibration {
                channel: channel.to_string(),
                token: token.clone(),
                reason,
            })
    }

    fn resolve_ego_pose(
        &self,
        channel: &str,
        token: &str,
    ) -> Result<RigidTransform, FusionWarning> {
        let pose = self
            .dataset
            .get_ego_pose(token)
            .map_err(|_| FusionWarning::EgoPoseNotFound {
                channel: channel.to_string(),
                token: token.to_string(),
            })?;

        pose
            .rigid_transform()
            .map_err(|reason| FusionWarning::InvalidEgoPose {
                channel: channel.to_string(),
                token: token.to_string(),
                reason,
            })
    }

    /// Vehicle motion between `sweep` and `keyframe`: maps the ego frame at the
    /// sweep's capture time to the keyframe's ego frame through the global
    /// frame. `None` when both share a pose or either has none recorded.
    fn ego_motion(
        &self,
        channel: &str,
        keyframe: &SensorDataRecord,
        sweep: &SensorDataRecord,
    ) -> Result<Option<RigidTransform>, FusionWarning> {
        match (
            keyframe.ego_pose_token.as_deref(),
            sweep.ego_pose_token.as_deref(),
        ) {
            (Some(key), Some(at)) if key != at => {
                let key_to_global = self.resolve_ego_pose(channel, key)?;
                let sweep_to_global = self.resolve_ego_pose(channel, at)?;
                Ok(Some(sweep_to_global.then(&key_to_global.inverse())))
            }
            _ => Ok(None),
        }
    }

    fn fuse_channel(&self, sample: &SampleRecord, channel: &str) -> ChannelResult {
        let Some(sd_token) = sample.data.get(channel) else {
            return ChannelResult::skipped(FusionWarning::ChannelNotInSample {
                channel: channel.to_string(),
            });
        };

        let keyframe = match self.dataset.get_sensor_data(sd_token) {
            Ok(record) => record,
            Err(_) => {
                return ChannelResult::skipped(FusionWarning::SensorDataNotFound {
                    channel: channel.to_string(),
                    token: sd_token.clone(),
                })
            }
        };

        let modality = keyframe.sensor_modality.clone();
        if !modality.is_point_cloud() {
            return ChannelResult::skipped(FusionWarning::UnsupportedModality {
                channel: channel.to_string(),
                modality,
            });
        }

        let keyframe_tf = match self.resolve_transform(channel, keyframe) {
            Ok(tf) => tf,
            Err(warning) => return ChannelResult::skipped(warning),
        };

        let mut warnings = Vec::new();
        let mut fused = PointCloud::with_columns(&[INTENSITY_COLUMN]);
        let mut sweeps_read = 0;

        for sweep in self.collect_sweeps(keyframe) {
            let same_sensor = sweep.calibrated_sensor_token == keyframe.calibrated_sensor_token;
            let sensor_to_ego = if same_sensor {
                Ok(keyframe_tf)
            } else {
                self.resolve_transform(channel, sweep)
            };
            let tf = sensor_to_ego.and_then(|tf| {
                Ok(match self.ego_motion(channel, keyframe, sweep)? {
                    Some(motion) => tf.then(&motion),
                    None => tf,
                })
            });
            let tf = match tf {
                Ok(tf) => tf,
                Err(warning) => {
                    warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
            };

            let loaded = load_sweep(&self.dataset.data_path(sweep));
            if let Some(path) = loaded.missing {
                warnings.push(FusionWarning::PointCloudMissing {
                    channel: channel.to_string(),
                    path,
                });
                continue;
            }
            sweeps_read += 1;

            let near_removed = remove_close(&loaded.cloud, self.params.min_distance);
            let in_ego = transform_cloud(&near_removed, &tf);
            let points = with_intensity(in_ego, &modality);

            extend_fused(&mut fused, points);
        }

        if sweeps_read == 0 {
            return ChannelResult {
                fused: None,
                warnings,
            };
        }

        if fused.is_empty() {
            let warning = FusionWarning::ChannelEmpty {
                channel: channel.to_string(),
            };
            warn!("{}", warning);
            warnings.push(warning);
        }

        debug!(
            "Channel {}: {} points from {} sweeps",
            channel,
            fused.len(),
            sweeps_read
        );

        ChannelResult {
            fused: Some((
                ChannelContribution {
                    channel: channel.to_string(),
                    modality,
                    sweeps: sweeps_read,
                    points: fused.len(),
                },
                fused,
            )),
            warnings,
        }
    }
}

/// Fuse one sample without keeping a [`SampleFusion`] around.
pub fn fuse_sample<D: Dataset + ?Sized>(
    dataset: &D,
    sample_token: &str,
    params: &FusionParams,
) -> Result<FusionOutcome, FusionError> {
    SampleFusion::new(dataset, params)?.fuse_sample(sample_token)
}
