//! Rigid-body transforms and geometric point filters.
//!
//! This module converts extrinsic calibrations (translation plus scalar-first
//! quaternion) into rigid transforms and applies them to point clouds. Per-point
//! work is parallelized using Rayon. Spatial math is done in `f64` and stored
//! back as `f32`.

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point3, Quaternion, Translation3, UnitQuaternion, Vector3,
};
use rayon::prelude::*;
use thiserror::Error;

use super::loaders::PointCloud;

/// Maximum deviation of a calibration quaternion's norm from 1.
pub const UNIT_NORM_TOLERANCE: f64 = 1e-6;

/// Errors raised when building a transform from calibration values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("rotation quaternion is not unit norm (|q| = {norm})")]
    NonUnitQuaternion { norm: f64 },

    #[error("calibration contains non-finite values")]
    NonFinite,
}

/// A rotation followed by a translation: `p' = R·p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    iso: Isometry3<f64>,
}

impl RigidTransform {
    /// Build a transform from a translation and a scalar-first `(w, x, y, z)`
    /// quaternion.
    ///
    /// The quaternion is used as given. A quaternion whose norm differs from 1
    /// by more than [`UNIT_NORM_TOLERANCE`] is rejected, never renormalized.
    pub fn new(translation: [f64; 3], rotation_wxyz: [f64; 4]) -> Result<Self, TransformError> {
        if translation
            .iter()
            .chain(rotation_wxyz.iter())
            .any(|v| !v.is_finite())
        {
            return Err(TransformError::NonFinite);
        }

        let [w, i, j, k] = rotation_wxyz;
        let q = Quaternion::new(w, i, j, k);
        let norm = q.norm();
        if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(TransformError::NonUnitQuaternion { norm });
        }

        let [tx, ty, tz] = translation;
        Ok(Self {
            iso: Isometry3::from_parts(
                Translation3::new(tx, ty, tz),
                UnitQuaternion::new_unchecked(q),
            ),
        })
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            iso: Isometry3::identity(),
        }
    }

    /// Rotation matrix derived from the quaternion.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.iso.rotation.to_rotation_matrix().into_inner()
    }

    /// Translation vector.
    pub fn translation(&self) -> Vector3<f64> {
        self.iso.translation.vector
    }

    /// The 4×4 homogeneous matrix of this transform.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        self.iso.to_homogeneous()
    }

    /// Applying `self` and then `next` is the same as applying the returned
    /// transform, whose matrix is `next · self`.
    pub fn then(&self, next: &RigidTransform) -> RigidTransform {
        RigidTransform {
            iso: next.iso * self.iso,
        }
    }

    /// The transform undoing `self`.
    pub fn inverse(&self) -> RigidTransform {
        RigidTransform {
            iso: self.iso.inverse(),
        }
    }

    /// Transform a single point.
    #[inline]
    pub fn apply(&self, p: [f32; 3]) -> [f32; 3] {
        let q = self
            .iso
            .transform_point(&Point3::new(p[0] as f64, p[1] as f64, p[2] as f64));
        [q.x as f32, q.y as f32, q.z as f32]
    }
}

/// Apply a rigid transform to every point of a cloud.
///
/// Rotation is applied before translation, point order is preserved and
/// auxiliary columns are copied bit-for-bit. An empty cloud yields an empty
/// cloud.
pub fn transform_cloud(cloud: &PointCloud, transform: &RigidTransform) -> PointCloud {
    let moved: Vec<[f32; 3]> = (0..cloud.len())
        .into_par_iter()
        .map(|i| transform.apply([cloud.x[i], cloud.y[i], cloud.z[i]]))
        .collect();

    let mut x = Vec::with_capacity(moved.len());
    let mut y = Vec::with_capacity(moved.len());
    let mut z = Vec::with_capacity(moved.len());
    for [px, py, pz] in moved {
        x.push(px);
        y.push(py);
        z.push(pz);
    }

    PointCloud {
        x,
        y,
        z,
        aux: cloud.aux.clone(),
    }
}

/// Drop points that lie within `min_distance` of the sensor origin.
///
/// A point is kept only if its Euclidean distance from the origin is strictly
/// greater than `min_distance`; a point exactly on the radius is removed.
pub fn remove_close(cloud: &PointCloud, min_distance: f32) -> PointCloud {
    let threshold = min_distance as f64;
    let keep: Vec<bool> = (0..cloud.len())
        .into_par_iter()
        .map(|i| {
            let (x, y, z) = (cloud.x[i] as f64, cloud.y[i] as f64, cloud.z[i] as f64);
            (x * x + y * y + z * z).sqrt() > threshold
        })
        .collect();

    cloud.select(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn yaw(angle: f64) -> [f64; 4] {
        [(angle / 2.0).cos(), 0.0, 0.0, (angle / 2.0).sin()]
    }

    fn cloud_of(points: &[[f32; 3]]) -> PointCloud {
        let mut cloud = PointCloud::with_columns(&["intensity"]);
        for (i, p) in points.iter().enumerate() {
            cloud.push(p[0], p[1], p[2], &[i as f32 + 0.125]);
        }
        cloud
    }

    #[test]
    fn test_origin_maps_to_translation() {
        let rotations = [
            [1.0, 0.0, 0.0, 0.0],
            yaw(FRAC_PI_2),
            [0.5, 0.5, 0.5, 0.5],
            [0.0, 1.0, 0.0, 0.0],
        ];
        let t = [1.5, -2.0, 0.75];

        for rotation in rotations {
            let tf = RigidTransform::new(t, rotation).unwrap();
            let p = tf.apply([0.0, 0.0, 0.0]);
            assert_eq!(p, [1.5, -2.0, 0.75]);
        }
    }

    #[test]
    fn test_yaw_rotation_then_translation() {
        let tf = RigidTransform::new([10.0, 0.0, 0.0], yaw(FRAC_PI_2)).unwrap();
        let p = tf.apply([1.0, 0.0, 0.0]);

        // (1,0,0) rotated 90° about z is (0,1,0), then shifted by +10 in x
        assert_relative_eq!(p[0], 10.0, epsilon = 1e-6);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(p[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scalar_first_matrix_convention() {
        let q = [0.5, 0.5, 0.5, 0.5];
        let tf = RigidTransform::new([0.0; 3], q).unwrap();
        let r = tf.rotation_matrix();

        // 120° about (1,1,1): cyclic permutation x -> y -> z -> x
        let expected = Matrix3::new(0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(r, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_non_unit_quaternion() {
        let err = RigidTransform::new([0.0; 3], [2.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err, TransformError::NonUnitQuaternion { norm: 2.0 });

        let err = RigidTransform::new([f64::NAN, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err, TransformError::NonFinite);
    }

    #[test]
    fn test_transform_preserves_count_order_and_aux() {
        let cloud = cloud_of(&[[1.0, 2.0, 3.0], [-4.0, 0.5, 9.0], [0.0, 0.0, 1.0]]);
        let tf = RigidTransform::new([0.3, 0.2, 0.1], [0.5, 0.5, 0.5, 0.5]).unwrap();

        let out = transform_cloud(&cloud, &tf);

        assert_eq!(out.len(), cloud.len());
        let before = cloud.column("intensity").unwrap();
        let after = out.column("intensity").unwrap();
        for (a, b) in before.iter().zip(after) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        // Permutation x -> y -> z -> x keeps point order
        assert_relative_eq!(out.y[0], 1.0 + 0.2, epsilon = 1e-6);
        assert_relative_eq!(out.y[1], -4.0 + 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_transform_empty_cloud() {
        let tf = RigidTransform::new([1.0, 1.0, 1.0], yaw(0.3)).unwrap();
        let out = transform_cloud(&PointCloud::with_columns(&["intensity"]), &tf);
        assert!(out.is_empty());
        assert_eq!(out.column_names(), vec!["intensity"]);
    }

    #[test]
    fn test_composition_matches_matrix_product() {
        let a = RigidTransform::new([1.0, 2.0, 3.0], yaw(0.7)).unwrap();
        let b = RigidTransform::new([-0.5, 0.0, 4.0], [0.5, 0.5, 0.5, 0.5]).unwrap();
        let composed = a.then(&b);

        assert_relative_eq!(
            composed.to_homogeneous(),
            b.to_homogeneous() * a.to_homogeneous(),
            epsilon = 1e-12
        );

        let cloud = cloud_of(&[[1.0, 0.0, 0.0], [2.5, -1.0, 0.25]]);
        let twice = transform_cloud(&transform_cloud(&cloud, &a), &b);
        let once = transform_cloud(&cloud, &composed);
        for i in 0..cloud.len() {
            assert_relative_eq!(twice.x[i], once.x[i], epsilon = 1e-5);
            assert_relative_eq!(twice.y[i], once.y[i], epsilon = 1e-5);
            assert_relative_eq!(twice.z[i], once.z[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_inverse_round_trips_points() {
        let tf = RigidTransform::new([3.0, -1.0, 0.5], yaw(1.1)).unwrap();
        let round = tf.then(&tf.inverse());

        assert_relative_eq!(
            round.to_homogeneous(),
            RigidTransform::identity().to_homogeneous(),
            epsilon = 1e-12
        );
        let [x, y, z] = tf.inverse().apply(tf.apply([2.0, 4.0, -1.0]));
        assert_relative_eq!(x, 2.0, epsilon = 1e-5);
        assert_relative_eq!(y, 4.0, epsilon = 1e-5);
        assert_relative_eq!(z, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_remove_close_boundary_excluded() {
        let cloud = cloud_of(&[
            [1.0, 0.0, 0.0],    // exactly on the radius
            [0.0, 0.0, 0.999],  // inside
            [0.0, 1.001, 0.0],  // just outside
            [3.0, 4.0, 0.0],    // distance 5
        ]);

        let kept = remove_close(&cloud, 1.0);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept.y, vec![1.001, 4.0]);
        assert_eq!(kept.column("intensity"), Some(&[2.125, 3.125][..]));
    }

    #[test]
    fn test_remove_close_zero_radius_keeps_off_origin_points() {
        let cloud = cloud_of(&[[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]]);
        let kept = remove_close(&cloud, 0.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.x, vec![0.1]);
    }
}
