use nalgebra::{DMatrix, Vector3};

use crate::error::IkError;
use crate::multi_body::JointKind;

/// World-frame geometric Jacobian of one end effector, built column by
/// column. Rows are linear velocity then angular velocity.
pub(crate) struct Jacobian {
    val: DMatrix<f64>,
}

impl Jacobian {
    pub(crate) fn new(columns: usize) -> Self {
        Self {
            val: DMatrix::zeros(6, columns),
        }
    }

    /// Column for a joint with world `axis` through world `origin`, acting
    /// on a point at `tip`.
    pub(crate) fn set_column(
        &mut self,
        idx: usize,
        kind: JointKind,
        axis: &Vector3<f64>,
        origin: &Vector3<f64>,
        tip: &Vector3<f64>,
    ) {
        let (linear, angular) = match kind {
            JointKind::Revolute => (axis.cross(&(tip - origin)), *axis),
            JointKind::Prismatic => (*axis, Vector3::zeros()),
            JointKind::Fixed => (Vector3::zeros(), Vector3::zeros()),
        };
        self.val.view_mut((0, idx), (3, 1)).copy_from(&linear);
        self.val.view_mut((3, idx), (3, 1)).copy_from(&angular);
    }

    pub(crate) fn into_inner(self) -> DMatrix<f64> {
        self.val
    }
}

/// Moore-Penrose pseudo-inverse via SVD, dropping singular values below
/// `epsilon`.
pub fn pseudo_inverse(matrix: &DMatrix<f64>, epsilon: f64) -> Result<DMatrix<f64>, IkError> {
    if matrix.is_empty() {
        return Ok(DMatrix::zeros(matrix.ncols(), matrix.nrows()));
    }
    matrix
        .clone()
        .pseudo_inverse(epsilon)
        .map_err(|e| IkError::Numerical(e.to_string()))
}

/// Stack `bottom` under `top`. Both must have the same column count.
pub fn stack_rows(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert_eq!(top.ncols(), bottom.ncols());
    let mut stacked = DMatrix::zeros(top.nrows() + bottom.nrows(), top.ncols());
    stacked.view_mut((0, 0), top.shape()).copy_from(top);
    stacked
        .view_mut((top.nrows(), 0), bottom.shape())
        .copy_from(bottom);
    stacked
}
