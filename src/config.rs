use nalgebra::{DMatrix, Vector6};
use serde::{Deserialize, Serialize};

use crate::error::IkError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_max_iterations() -> usize {
    100
}
const fn default_position_tolerance() -> f64 {
    1e-4
}
const fn default_angle_tolerance() -> f64 {
    1e-3
}
const fn default_max_step() -> f64 {
    0.5
}
const fn default_noise_floor() -> f64 {
    1e-9
}
const fn default_stall_iterations() -> usize {
    2
}
const fn default_pinv_epsilon() -> f64 {
    1e-10
}
const fn default_damping() -> f64 {
    0.05
}
const fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// What to do with the joint vector when a solve does not converge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Leave the skeleton at the last applied configuration.
    #[default]
    KeepLastApplied,
    /// Restore the configuration the solve started from.
    RevertToInitial,
}

/// Tuning shared by every task of a hierarchy solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Global iteration budget per solve.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Translation error tolerance (meters).
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,

    /// Rotation error tolerance (radians).
    #[serde(default = "default_angle_tolerance")]
    pub angle_tolerance: f64,

    /// Largest absolute change of any joint in one iteration.
    #[serde(default = "default_max_step")]
    pub max_step: f64,

    /// Error reductions at or below this value do not count as progress.
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,

    /// Consecutive iterations without progress before the solve stops.
    #[serde(default = "default_stall_iterations")]
    pub stall_iterations: usize,

    /// Singular value cut-off used by every pseudo-inverse.
    #[serde(default = "default_pinv_epsilon")]
    pub pinv_epsilon: f64,

    /// Damping of the combined solve of a level holding several tasks.
    /// Zero switches to the plain pseudo-inverse.
    #[serde(default = "default_damping")]
    pub level_damping: f64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            position_tolerance: default_position_tolerance(),
            angle_tolerance: default_angle_tolerance(),
            max_step: default_max_step(),
            noise_floor: default_noise_floor(),
            stall_iterations: default_stall_iterations(),
            pinv_epsilon: default_pinv_epsilon(),
            level_damping: default_damping(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl SolverConfig {
    /// Reject values the solver cannot work with.
    pub fn validate(&self) -> Result<(), IkError> {
        if !(self.position_tolerance > 0.0) {
            return Err(IkError::invalid_config("position_tolerance", "must be > 0"));
        }
        if !(self.angle_tolerance > 0.0) {
            return Err(IkError::invalid_config("angle_tolerance", "must be > 0"));
        }
        if !(self.max_step > 0.0) {
            return Err(IkError::invalid_config("max_step", "must be > 0"));
        }
        if !(self.noise_floor >= 0.0) {
            return Err(IkError::invalid_config("noise_floor", "must be >= 0"));
        }
        if self.stall_iterations == 0 {
            return Err(IkError::invalid_config("stall_iterations", "must be >= 1"));
        }
        if !(self.pinv_epsilon >= 0.0) {
            return Err(IkError::invalid_config("pinv_epsilon", "must be >= 0"));
        }
        if !(self.level_damping >= 0.0) {
            return Err(IkError::invalid_config("level_damping", "must be >= 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JacobianStep
// ---------------------------------------------------------------------------

/// Numerical update rule used when no analytic solution drives the step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacobianStep {
    /// `dq = gain * Jᵀ e`
    Transpose { gain: f64 },
    /// `dq = Jᵀ (J Jᵀ + λ² I)⁻¹ e`
    DampedLeastSquares {
        #[serde(default = "default_damping")]
        damping: f64,
    },
}

impl Default for JacobianStep {
    fn default() -> Self {
        Self::DampedLeastSquares {
            damping: default_damping(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConstrainedAxes
// ---------------------------------------------------------------------------

/// Which of the six pose error components a task constrains.
///
/// Components are ordered `[x, y, z]` for both the linear and the angular
/// part, matching the rows of the end-effector Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstrainedAxes {
    #[serde(default = "all_axes")]
    pub linear: [bool; 3],
    #[serde(default = "all_axes")]
    pub angular: [bool; 3],
}

const fn all_axes() -> [bool; 3] {
    [default_true(); 3]
}

impl Default for ConstrainedAxes {
    fn default() -> Self {
        Self::all()
    }
}

impl ConstrainedAxes {
    /// Full pose: translation and rotation.
    pub const fn all() -> Self {
        Self {
            linear: [true; 3],
            angular: [true; 3],
        }
    }

    /// Translation only.
    pub const fn position() -> Self {
        Self {
            linear: [true; 3],
            angular: [false; 3],
        }
    }

    /// Rotation only.
    pub const fn orientation() -> Self {
        Self {
            linear: [false; 3],
            angular: [true; 3],
        }
    }

    pub fn is_full(&self) -> bool {
        self.linear.iter().chain(self.angular.iter()).all(|&a| a)
    }

    pub fn row(&self, row: usize) -> bool {
        match row {
            0..=2 => self.linear[row],
            3..=5 => self.angular[row - 3],
            _ => false,
        }
    }

    /// Zero the unconstrained components of a pose error.
    pub fn mask_error(&self, error: &mut Vector6<f64>) {
        for row in 0..6 {
            if !self.row(row) {
                error[row] = 0.0;
            }
        }
    }

    /// Zero the unconstrained rows of a 6-row Jacobian.
    pub fn mask_jacobian(&self, jacobian: &mut DMatrix<f64>) {
        for row in 0..jacobian.nrows().min(6) {
            if !self.row(row) {
                jacobian.row_mut(row).fill(0.0);
            }
        }
    }
}
