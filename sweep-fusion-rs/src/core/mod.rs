//! Core data types, dataset access and I/O operations.

pub mod calibration;
pub mod dataset;
pub mod loaders;
pub mod records;
pub mod transforms;
pub mod writers;

pub use calibration::{CalibrationNotFound, CalibrationTable};
pub use dataset::{Dataset, DatasetError, RecordStore};
pub use loaders::{load_sweep, LoadedSweep, PointCloud};
pub use records::{CalibrationRecord, SampleRecord, SceneRecord, SensorDataRecord, SensorModality};
pub use transforms::{remove_close, transform_cloud, RigidTransform, TransformError};
pub use writers::{CloudSink, DirectorySink, WriteError, INTENSITY_COLUMN};
