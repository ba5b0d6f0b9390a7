//! Per-task joint-space step proposals.
//!
//! A [`GradientMethod`] looks at one end effector, its target and the
//! current configuration, and proposes a joint-space step for the dofs it is
//! bound to. Clamping, applying and convergence checks happen in the
//! hierarchy solver.

mod analytic_seeded;

use std::collections::HashSet;
use std::fmt::Debug;

use nalgebra::{DMatrix, DVector, Isometry3, Vector6};

use crate::config::{ConstrainedAxes, JacobianStep};
use crate::error::{IkError, Mismatch};
use crate::kinematics::Kinematics;
use crate::multi_body::EndEffectorId;

pub use self::analytic_seeded::{AnalyticSeeded, FreeParameterStrategy};

/// Everything a method sees when proposing one step.
#[derive(Clone, Copy)]
pub struct StepInput<'a> {
    pub skeleton: &'a dyn Kinematics,
    pub end_effector: EndEffectorId,
    /// Target pose in world coordinates.
    pub target: &'a Isometry3<f64>,
    pub positions: &'a DVector<f64>,
    /// Pose error with unconstrained components zeroed.
    pub error: &'a Vector6<f64>,
    pub axes: ConstrainedAxes,
}

pub trait GradientMethod: Debug + Send + Sync {
    /// Identifier used in diagnostics.
    fn name(&self) -> &str;

    /// Resolve the dofs this method drives for `ee` and check that the
    /// method can work with them.
    fn bind(&mut self, skeleton: &dyn Kinematics, ee: EndEffectorId) -> Result<(), IkError>;

    /// Dofs the proposed steps move. Empty until bound.
    fn dofs(&self) -> &[usize];

    /// Joint-space step over the whole skeleton; entries outside
    /// [`dofs`](Self::dofs) are zero.
    fn propose_step(&self, input: &StepInput<'_>) -> Result<DVector<f64>, IkError>;
}

pub(crate) fn check_dofs(dofs: &[usize], num_dofs: usize) -> Result<(), IkError> {
    let mut seen = HashSet::new();
    for &dof in dofs {
        if dof >= num_dofs {
            return Err(Mismatch::DofOutOfRange { dof, num_dofs }.into());
        }
        if !seen.insert(dof) {
            return Err(Mismatch::DuplicateDof(dof).into());
        }
    }
    Ok(())
}

/// Jacobian transpose or damped least squares on the end-effector chain.
#[derive(Debug, Clone)]
pub struct JacobianMethod {
    name: String,
    step: JacobianStep,
    dofs: Vec<usize>,
}

impl Default for JacobianMethod {
    fn default() -> Self {
        Self::new(JacobianStep::default())
    }
}

impl JacobianMethod {
    pub fn new(step: JacobianStep) -> Self {
        Self {
            name: "jacobian".to_string(),
            step,
            dofs: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn step(&self) -> JacobianStep {
        self.step
    }

    /// Step for an explicit set of dofs, independent of any binding.
    pub(crate) fn step_for(
        &self,
        dofs: &[usize],
        input: &StepInput<'_>,
    ) -> Result<DVector<f64>, IkError> {
        let mut jacobian =
            input
                .skeleton
                .end_effector_jacobian(input.end_effector, input.positions, dofs)?;
        input.axes.mask_jacobian(&mut jacobian);
        let local = match self.step {
            JacobianStep::Transpose { gain } => jacobian.transpose() * input.error * gain,
            JacobianStep::DampedLeastSquares { damping } => {
                // DLS: dq = J^T (J J^T + lambda^2 I)^{-1} * error
                let jjt = &jacobian * jacobian.transpose();
                let damped = jjt + DMatrix::identity(6, 6) * (damping * damping);
                let Some(damped_inv) = damped.try_inverse() else {
                    return Err(IkError::Numerical(
                        "damped Jacobian is singular; use a positive damping".to_string(),
                    ));
                };
                jacobian.transpose() * damped_inv * input.error
            }
        };
        let mut step = DVector::zeros(input.skeleton.num_dofs());
        for (&dof, value) in dofs.iter().zip(local.iter()) {
            step[dof] = *value;
        }
        Ok(step)
    }
}

impl GradientMethod for JacobianMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, skeleton: &dyn Kinematics, ee: EndEffectorId) -> Result<(), IkError> {
        let dofs = skeleton.chain_dofs(ee)?;
        check_dofs(&dofs, skeleton.num_dofs())?;
        self.dofs = dofs;
        Ok(())
    }

    fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    fn propose_step(&self, input: &StepInput<'_>) -> Result<DVector<f64>, IkError> {
        self.step_for(&self.dofs, input)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::pose_error;
    use crate::multi_body::{Joint, JointLimit, MultiBody};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn planar_arm() -> (MultiBody, EndEffectorId) {
        let mut multi_body = MultiBody::new("planar", "base");
        let limit = JointLimit::unbounded_revolute();
        let l1 = multi_body
            .add_link(0, "l1", Joint::revolute("j1", Isometry3::identity(), Vector3::z(), limit))
            .unwrap();
        let elbow = Joint::revolute("j2", Isometry3::translation(1., 0., 0.), Vector3::z(), limit);
        let l2 = multi_body.add_link(l1, "l2", elbow).unwrap();
        let ee = multi_body
            .add_end_effector("tip", l2, Isometry3::translation(1., 0., 0.))
            .unwrap();
        (multi_body, ee)
    }

    fn step(
        method: &JacobianMethod,
        multi_body: &MultiBody,
        ee: EndEffectorId,
        target: &Isometry3<f64>,
    ) -> DVector<f64> {
        let q = multi_body.positions().clone();
        let axes = ConstrainedAxes::position();
        let mut error = pose_error(&multi_body.end_effector_pose(ee, &q).unwrap(), target);
        axes.mask_error(&mut error);
        method
            .propose_step(&StepInput {
                skeleton: multi_body,
                end_effector: ee,
                target,
                positions: &q,
                error: &error,
                axes,
            })
            .unwrap()
    }

    #[test]
    fn test_bind_uses_chain() {
        let (multi_body, ee) = planar_arm();
        let mut method = JacobianMethod::default();
        assert!(method.dofs().is_empty());
        method.bind(&multi_body, ee).unwrap();
        assert_eq!(method.dofs(), &[0, 1]);
        assert_eq!(method.name(), "jacobian");
    }

    #[test]
    fn test_transpose_step() {
        let (mut multi_body, ee) = planar_arm();
        multi_body.set_positions(DVector::from_vec(vec![0.2, 0.9])).unwrap();
        let mut method = JacobianMethod::new(JacobianStep::Transpose { gain: 0.5 });
        method.bind(&multi_body, ee).unwrap();

        let target = Isometry3::translation(0.5, 1.2, 0.);
        let dq = step(&method, &multi_body, ee, &target);

        let q = multi_body.positions().clone();
        let jacobian = multi_body.end_effector_jacobian(ee, &q, &[0, 1]).unwrap();
        let mut error = pose_error(&multi_body.end_effector_pose(ee, &q).unwrap(), &target);
        ConstrainedAxes::position().mask_error(&mut error);
        let expected = jacobian.transpose() * error * 0.5;
        assert_relative_eq!(dq, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_dls_step_reduces_error() {
        let (mut multi_body, ee) = planar_arm();
        multi_body.set_positions(DVector::from_vec(vec![0.1, 0.5])).unwrap();
        let mut method = JacobianMethod::default();
        method.bind(&multi_body, ee).unwrap();

        let target = Isometry3::translation(1.2, 0.9, 0.);
        let before = (target.translation.vector
            - multi_body.end_effector_pose(ee, multi_body.positions()).unwrap().translation.vector)
            .norm();
        let dq = step(&method, &multi_body, ee, &target);
        let q = multi_body.positions() + dq * 0.5;
        let reached = multi_body.end_effector_pose(ee, &q).unwrap();
        let after = (target.translation.vector - reached.translation.vector).norm();
        assert!(after < before, "{after} >= {before}");
    }

    #[test]
    fn test_check_dofs() {
        assert!(check_dofs(&[0, 2], 3).is_ok());
        assert!(matches!(
            check_dofs(&[0, 3], 3),
            Err(IkError::ConfigurationMismatch(Mismatch::DofOutOfRange { dof: 3, num_dofs: 3 }))
        ));
        assert!(matches!(
            check_dofs(&[1, 1], 3),
            Err(IkError::ConfigurationMismatch(Mismatch::DuplicateDof(1)))
        ));
    }
}
