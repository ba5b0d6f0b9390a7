//! Rigid transforms expressed relative to a parent frame or the world.
//!
//! A [`FrameRef`] is a shared handle: every clone sees the same frame, so a
//! target bound to an [`IkTask`](crate::IkTask) can be moved by whoever else
//! holds it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use approx::abs_diff_eq;
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3, Vector6};

use crate::error::IkError;

const ROTATION_EPSILON: f64 = 1e-6;

/// A named rigid transform, optionally attached to a parent frame.
#[derive(Debug, Clone)]
pub struct Frame {
    name: String,
    local: Isometry3<f64>,
    parent: Option<FrameRef>,
}

impl Frame {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transform relative to the parent frame (or the world).
    pub fn local_transform(&self) -> Isometry3<f64> {
        self.local
    }

    pub fn parent(&self) -> Option<&FrameRef> {
        self.parent.as_ref()
    }
}

/// Shared, mutable handle to a [`Frame`].
#[derive(Debug, Clone)]
pub struct FrameRef(Arc<RwLock<Frame>>);

impl FrameRef {
    /// A frame whose parent is the world, at the identity.
    pub fn world(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// A frame expressed relative to `parent`, at the identity.
    pub fn child_of(parent: &FrameRef, name: impl Into<String>) -> Self {
        Self::new(name, Some(parent.clone()))
    }

    fn new(name: impl Into<String>, parent: Option<FrameRef>) -> Self {
        Self(Arc::new(RwLock::new(Frame {
            name: name.into(),
            local: Isometry3::identity(),
            parent,
        })))
    }

    fn read(&self) -> RwLockReadGuard<'_, Frame> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Frame> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Set the rotation from a 3×3 matrix.
    ///
    /// The matrix must be orthonormal with determinant +1; anything else is
    /// rejected and the frame is left unchanged.
    pub fn set_rotation(&self, rotation: &Matrix3<f64>) -> Result<(), IkError> {
        let orthonormal = abs_diff_eq!(
            rotation.transpose() * rotation,
            Matrix3::identity(),
            epsilon = ROTATION_EPSILON
        );
        if !orthonormal || !abs_diff_eq!(rotation.determinant(), 1.0, epsilon = ROTATION_EPSILON) {
            return Err(IkError::InvalidRotation);
        }
        let rotation = Rotation3::from_matrix_unchecked(*rotation);
        self.write().local.rotation = UnitQuaternion::from_rotation_matrix(&rotation);
        Ok(())
    }

    pub fn set_orientation(&self, orientation: UnitQuaternion<f64>) {
        self.write().local.rotation = orientation;
    }

    pub fn set_translation(&self, translation: Vector3<f64>) {
        self.write().local.translation = Translation3::from(translation);
    }

    pub fn set_transform(&self, transform: Isometry3<f64>) {
        self.write().local = transform;
    }

    pub fn local_transform(&self) -> Isometry3<f64> {
        self.read().local
    }

    /// Transform from this frame to the world, composing every parent.
    pub fn world_transform(&self) -> Isometry3<f64> {
        let frame = self.read();
        match &frame.parent {
            Some(parent) => parent.world_transform() * frame.local,
            None => frame.local,
        }
    }

    /// Whether both handles refer to the same frame.
    pub fn ptr_eq(&self, other: &FrameRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Snapshot of the underlying frame.
    pub fn snapshot(&self) -> Frame {
        self.read().clone()
    }
}

/// Pose error from `current` to `target` in world coordinates.
///
/// Rows are `[target.p - current.p; scaled_axis(R_target * R_currentᵀ)]`,
/// the same layout as the rows of the end-effector Jacobian. The effector's
/// own orientation never rotates the error; there is no local-frame variant.
pub fn pose_error(current: &Isometry3<f64>, target: &Isometry3<f64>) -> Vector6<f64> {
    let linear = target.translation.vector - current.translation.vector;
    let angular = (target.rotation * current.rotation.inverse()).scaled_axis();
    Vector6::new(linear.x, linear.y, linear.z, angular.x, angular.y, angular.z)
}
