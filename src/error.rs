use thiserror::Error;

/// Top-level error type for hik.
///
/// Failing to reach a target is not an error: a solve that does not
/// converge returns a [`SolveReport`](crate::SolveReport) whose
/// `success()` is `false`.
#[derive(Debug, Error)]
pub enum IkError {
    #[error("Analytic solver not found: {0}")]
    SolverNotFound(String),

    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(#[from] Mismatch),

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error("Duplicate link name: {0}")]
    DuplicateLink(String),

    #[error("Unknown end effector: {0}")]
    UnknownEndEffector(usize),

    #[error("Rotation is not orthonormal with determinant +1")]
    InvalidRotation,

    #[error("Invalid joint limit: lower={lower} > upper={upper}")]
    InvalidLimit { lower: f64, upper: f64 },

    #[error("Invalid value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("URDF error: {0}")]
    Urdf(#[from] urdf_rs::UrdfError),
}

/// Disagreement between what a binding supplies and what it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Mismatch {
    #[error("joint count: expected {expected}, got {got}")]
    JointCount { expected: usize, got: usize },

    #[error("free parameter count: expected {expected}, got {got}")]
    FreeParameterCount { expected: usize, got: usize },

    #[error("free parameter index {index} outside chain of {num_joints} joints")]
    FreeParameterIndex { index: usize, num_joints: usize },

    #[error("free parameter index {0} listed twice")]
    DuplicateFreeParameter(usize),

    #[error("dof {dof} outside skeleton with {num_dofs} dofs")]
    DofOutOfRange { dof: usize, num_dofs: usize },

    #[error("dof {0} listed twice")]
    DuplicateDof(usize),

    #[error("joint vector length: expected {expected}, got {got}")]
    JointVectorLength { expected: usize, got: usize },
}

impl IkError {
    pub(crate) fn invalid_config(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
