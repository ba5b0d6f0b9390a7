//! One end effector, one target, one gradient method.

use nalgebra::{DMatrix, DVector, Vector6};

use crate::config::{ConstrainedAxes, SolverConfig};
use crate::error::IkError;
use crate::frame::{pose_error, FrameRef};
use crate::gradient::{GradientMethod, JacobianMethod, StepInput};
use crate::hierarchy::{solve_tasks, SolveReport};
use crate::kinematics::Kinematics;
use crate::multi_body::EndEffectorId;

/// Pose error of a task, with unconstrained components zeroed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskError {
    pub vector: Vector6<f64>,
    /// Norm of the translational part.
    pub position: f64,
    /// Norm of the rotational part (radians).
    pub orientation: f64,
}

impl TaskError {
    pub fn new(vector: Vector6<f64>) -> Self {
        Self {
            vector,
            position: vector.fixed_rows::<3>(0).norm(),
            orientation: vector.fixed_rows::<3>(3).norm(),
        }
    }

    pub fn within(&self, config: &SolverConfig) -> bool {
        self.position <= config.position_tolerance && self.orientation <= config.angle_tolerance
    }

    pub fn norm(&self) -> f64 {
        self.vector.norm()
    }
}

/// Drives one end effector toward a target frame.
///
/// Level 0 is the highest priority. A new task is active, constrains the
/// full pose and uses a damped least squares [`JacobianMethod`].
#[derive(Debug)]
pub struct IkTask {
    end_effector: EndEffectorId,
    target: FrameRef,
    method: Box<dyn GradientMethod>,
    level: usize,
    active: bool,
    axes: ConstrainedAxes,
}

impl IkTask {
    pub fn new(
        skeleton: &dyn Kinematics,
        ee: EndEffectorId,
        target: FrameRef,
    ) -> Result<Self, IkError> {
        let mut method = JacobianMethod::default();
        method.bind(skeleton, ee)?;
        Ok(Self {
            end_effector: ee,
            target,
            method: Box::new(method),
            level: 0,
            active: true,
            axes: ConstrainedAxes::all(),
        })
    }

    pub fn end_effector(&self) -> EndEffectorId {
        self.end_effector
    }

    pub fn target(&self) -> &FrameRef {
        &self.target
    }

    pub fn set_target(&mut self, target: FrameRef) {
        self.target = target;
    }

    pub fn hierarchy_level(&self) -> usize {
        self.level
    }

    pub fn set_hierarchy_level(&mut self, level: usize) {
        self.level = level;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn axes(&self) -> ConstrainedAxes {
        self.axes
    }

    pub fn set_axes(&mut self, axes: ConstrainedAxes) {
        self.axes = axes;
    }

    pub fn gradient_method(&self) -> &dyn GradientMethod {
        self.method.as_ref()
    }

    /// Bind `method` to this task's end effector and switch to it. The
    /// current method stays in place if binding fails.
    pub fn set_gradient_method(
        &mut self,
        skeleton: &dyn Kinematics,
        mut method: impl GradientMethod + 'static,
    ) -> Result<(), IkError> {
        method.bind(skeleton, self.end_effector)?;
        log::debug!(
            "task on end effector {}: gradient method {} on dofs {:?}",
            self.end_effector.0,
            method.name(),
            method.dofs()
        );
        self.method = Box::new(method);
        Ok(())
    }

    /// Dofs this task moves.
    pub fn dofs(&self) -> &[usize] {
        self.method.dofs()
    }

    pub fn error(
        &self,
        skeleton: &dyn Kinematics,
        q: &DVector<f64>,
    ) -> Result<TaskError, IkError> {
        let current = skeleton.end_effector_pose(self.end_effector, q)?;
        let mut vector = pose_error(&current, &self.target.world_transform());
        self.axes.mask_error(&mut vector);
        Ok(TaskError::new(vector))
    }

    /// 6×`num_dofs` Jacobian with nonzero columns only for [`dofs`](Self::dofs)
    /// and unconstrained rows zeroed.
    pub fn jacobian(
        &self,
        skeleton: &dyn Kinematics,
        q: &DVector<f64>,
    ) -> Result<DMatrix<f64>, IkError> {
        self.masked_jacobian(skeleton, q, self.dofs())
    }

    /// Like [`jacobian`](Self::jacobian), but over every dof of the end
    /// effector's chain, including joints the gradient method never moves.
    ///
    /// Lower hierarchy levels are projected against this matrix.
    pub fn constraint_jacobian(
        &self,
        skeleton: &dyn Kinematics,
        q: &DVector<f64>,
    ) -> Result<DMatrix<f64>, IkError> {
        let chain = skeleton.chain_dofs(self.end_effector)?;
        self.masked_jacobian(skeleton, q, &chain)
    }

    fn masked_jacobian(
        &self,
        skeleton: &dyn Kinematics,
        q: &DVector<f64>,
        dofs: &[usize],
    ) -> Result<DMatrix<f64>, IkError> {
        let mut local = skeleton.end_effector_jacobian(self.end_effector, q, dofs)?;
        self.axes.mask_jacobian(&mut local);
        let mut full = DMatrix::zeros(6, skeleton.num_dofs());
        for (column, &dof) in dofs.iter().enumerate() {
            full.set_column(dof, &local.column(column));
        }
        Ok(full)
    }

    /// Step proposed by the gradient method at `q`.
    pub fn step(
        &self,
        skeleton: &dyn Kinematics,
        q: &DVector<f64>,
        error: &TaskError,
    ) -> Result<DVector<f64>, IkError> {
        let target = self.target.world_transform();
        self.method.propose_step(&StepInput {
            skeleton,
            end_effector: self.end_effector,
            target: &target,
            positions: q,
            error: &error.vector,
            axes: self.axes,
        })
    }

    /// Solve this task alone.
    pub fn solve(
        &self,
        skeleton: &mut dyn Kinematics,
        config: &SolverConfig,
    ) -> Result<SolveReport, IkError> {
        solve_tasks(&[self], skeleton, config)
    }
}
