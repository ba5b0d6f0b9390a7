//! Priority-ordered resolution of several IK tasks on one skeleton.
//!
//! Every iteration evaluates all active tasks, then folds over hierarchy
//! levels in ascending order. Each level's step is projected into the
//! nullspace of the stacked chain Jacobians of the levels before it, so
//! lower priority tasks only use the freedom higher priority tasks leave
//! over. Tasks sharing a level are solved as one stacked system.
//! The accumulated step is clamped and applied once per iteration.
//!
//! A solve that does not converge leaves the skeleton at the last applied
//! configuration unless [`FailurePolicy::RevertToInitial`] is configured.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::config::{FailurePolicy, SolverConfig};
use crate::error::IkError;
use crate::gradient::check_dofs;
use crate::kinematics::{pseudo_inverse, stack_rows, Kinematics};
use crate::multi_body::JointLimit;
use crate::task::{IkTask, TaskError};

/// Constraint accumulated over the levels solved so far.
#[derive(Debug, Clone, PartialEq)]
pub struct NullspaceFold {
    jacobian: DMatrix<f64>,
    projector: DMatrix<f64>,
}

impl NullspaceFold {
    /// Nothing constrained yet: empty Jacobian, identity projector.
    pub fn new(num_dofs: usize) -> Self {
        Self {
            jacobian: DMatrix::zeros(0, num_dofs),
            projector: DMatrix::identity(num_dofs, num_dofs),
        }
    }

    /// Part of `step` that leaves every absorbed level unchanged to first
    /// order.
    pub fn project(&self, step: &DVector<f64>) -> DVector<f64> {
        &self.projector * step
    }

    /// Add a level's Jacobian to the constraint: `N = I - J⁺J` over all
    /// levels absorbed so far.
    pub fn absorb(self, level: &DMatrix<f64>, epsilon: f64) -> Result<Self, IkError> {
        let jacobian = stack_rows(&self.jacobian, level);
        let pinv = pseudo_inverse(&jacobian, epsilon)?;
        let n = jacobian.ncols();
        let projector = DMatrix::identity(n, n) - pinv * &jacobian;
        Ok(Self { jacobian, projector })
    }

    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    pub fn projector(&self) -> &DMatrix<f64> {
        &self.projector
    }
}

/// Limit a joint-space step.
///
/// The whole step is scaled so no joint moves more than `max_step`, then
/// each joint is clipped so `q + step` stays inside its limit. A step with
/// non-finite entries is discarded.
pub fn clamp_step(
    q: &DVector<f64>,
    step: &DVector<f64>,
    limits: &[JointLimit],
    max_step: f64,
) -> DVector<f64> {
    if step.iter().any(|value| !value.is_finite()) {
        log::warn!("discarding non-finite joint step");
        return DVector::zeros(step.len());
    }
    let largest = step.amax();
    let mut clamped = if largest > max_step {
        step * (max_step / largest)
    } else {
        step.clone()
    };
    for (dof, limit) in limits.iter().enumerate().take(clamped.len()) {
        clamped[dof] = limit.clamp(q[dof] + clamped[dof]) - q[dof];
    }
    clamped
}

/// Handle to a task owned by a [`HierarchicalIk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every active task is within tolerance.
    Converged,
    /// The iteration budget ran out.
    Exhausted,
    /// No level reduced its error for `stall_iterations` iterations.
    Stalled,
}

/// Residual of one task when the solve stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    /// Position of the task in the solved list, or its [`TaskId`] value
    /// when solved through [`HierarchicalIk`].
    pub index: usize,
    pub level: usize,
    pub position_error: f64,
    pub orientation_error: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    pub outcome: Outcome,
    /// Steps applied to the skeleton.
    pub iterations: usize,
    /// Active tasks only, by level then input order.
    pub tasks: Vec<TaskReport>,
}

impl SolveReport {
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Converged
    }
}

struct Evaluated {
    index: usize,
    level: usize,
    error: TaskError,
}

fn evaluate(
    levels: &BTreeMap<usize, Vec<(usize, &IkTask)>>,
    skeleton: &dyn Kinematics,
    q: &DVector<f64>,
) -> Result<Vec<Evaluated>, IkError> {
    let mut evaluated = Vec::new();
    for (&level, tasks) in levels {
        for &(index, task) in tasks {
            evaluated.push(Evaluated {
                index,
                level,
                error: task.error(skeleton, q)?,
            });
        }
    }
    Ok(evaluated)
}

fn level_sums(evaluated: &[Evaluated]) -> Vec<f64> {
    let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
    for e in evaluated {
        *sums.entry(e.level).or_default() += e.error.norm();
    }
    sums.into_values().collect()
}

fn report(
    outcome: Outcome,
    iterations: usize,
    evaluated: &[Evaluated],
    config: &SolverConfig,
) -> SolveReport {
    SolveReport {
        outcome,
        iterations,
        tasks: evaluated
            .iter()
            .map(|e| TaskReport {
                index: e.index,
                level: e.level,
                position_error: e.error.position,
                orientation_error: e.error.orientation,
                converged: e.error.within(config),
            })
            .collect(),
    }
}

/// `dq = Jᵀ (J Jᵀ + λ² I)⁻¹ r`, or `J⁺ r` when `level_damping` is zero.
fn damped_solve(
    jacobian: &DMatrix<f64>,
    residual: &DVector<f64>,
    config: &SolverConfig,
) -> Result<DVector<f64>, IkError> {
    if config.level_damping == 0.0 {
        return Ok(pseudo_inverse(jacobian, config.pinv_epsilon)? * residual);
    }
    let rows = jacobian.nrows();
    let damping = config.level_damping * config.level_damping;
    let gram = jacobian * jacobian.transpose() + DMatrix::identity(rows, rows) * damping;
    let Some(cholesky) = gram.cholesky() else {
        return Err(IkError::Numerical(
            "damped level system is not positive definite".to_string(),
        ));
    };
    Ok(jacobian.transpose() * cholesky.solve(residual))
}

/// Step of one level inside the nullspace of the levels before it.
///
/// A lone task contributes its own proposed step, projected. Several tasks
/// are solved together: their stacked Jacobians, projected by `N`, against
/// the stacked error minus what `accumulated` already achieves.
fn level_step(
    level: &[(&IkTask, &Evaluated)],
    skeleton: &dyn Kinematics,
    q: &DVector<f64>,
    fold: &NullspaceFold,
    accumulated: &DVector<f64>,
    config: &SolverConfig,
) -> Result<DVector<f64>, IkError> {
    if let [(task, evaluated)] = level {
        let step = task.step(skeleton, q, &evaluated.error)?;
        return Ok(fold.project(&step));
    }
    let mut jacobian = DMatrix::zeros(0, q.len());
    let mut error = Vec::with_capacity(6 * level.len());
    for (task, evaluated) in level {
        jacobian = stack_rows(&jacobian, &task.jacobian(skeleton, q)?);
        error.extend(evaluated.error.vector.iter().copied());
    }
    let residual = DVector::from_vec(error) - &jacobian * accumulated;
    damped_solve(&(jacobian * fold.projector()), &residual, config)
}

/// Solve `tasks` on `skeleton`. Inactive tasks are ignored.
pub fn solve_tasks(
    tasks: &[&IkTask],
    skeleton: &mut dyn Kinematics,
    config: &SolverConfig,
) -> Result<SolveReport, IkError> {
    config.validate()?;
    let num_dofs = skeleton.num_dofs();
    for task in tasks {
        check_dofs(task.dofs(), num_dofs)?;
    }
    let limits = skeleton.joint_limits()?;
    let initial = skeleton.positions().clone();

    let mut levels: BTreeMap<usize, Vec<(usize, &IkTask)>> = BTreeMap::new();
    for (index, &task) in tasks.iter().enumerate() {
        if task.is_active() {
            levels.entry(task.hierarchy_level()).or_default().push((index, task));
        }
    }

    let mut iterations = 0;
    let mut previous: Option<Vec<f64>> = None;
    let mut stalled = 0;
    let (outcome, evaluated) = loop {
        let q = skeleton.positions().clone();
        let evaluated = evaluate(&levels, &*skeleton, &q)?;
        if evaluated.iter().all(|e| e.error.within(config)) {
            break (Outcome::Converged, evaluated);
        }
        if iterations == config.max_iterations {
            break (Outcome::Exhausted, evaluated);
        }

        let sums = level_sums(&evaluated);
        log::trace!("iteration {iterations}: level errors {sums:?}");
        if let Some(last) = &previous {
            let progress = last
                .iter()
                .zip(sums.iter())
                .any(|(before, after)| before - after > config.noise_floor);
            if progress {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= config.stall_iterations {
                    log::warn!("no level reduced its error for {stalled} iterations, stopping");
                    break (Outcome::Stalled, evaluated);
                }
            }
        }
        previous = Some(sums);

        let mut fold = NullspaceFold::new(num_dofs);
        let mut delta = DVector::zeros(num_dofs);
        let mut remaining = levels.len();
        let mut cursor = evaluated.iter();
        for level_tasks in levels.values() {
            let level: Vec<(&IkTask, &Evaluated)> = level_tasks
                .iter()
                .map(|&(_, task)| task)
                .zip(cursor.by_ref())
                .collect();
            let step = level_step(&level, &*skeleton, &q, &fold, &delta, config)?;
            delta += step;
            remaining -= 1;
            if remaining > 0 {
                let mut constraint = DMatrix::zeros(0, num_dofs);
                for (task, _) in &level {
                    let rows = task.constraint_jacobian(&*skeleton, &q)?;
                    constraint = stack_rows(&constraint, &rows);
                }
                fold = fold.absorb(&constraint, config.pinv_epsilon)?;
            }
        }

        let step = clamp_step(&q, &delta, &limits, config.max_step);
        skeleton.set_positions(q + step)?;
        iterations += 1;
    };

    log::debug!(
        "solved {} tasks on {} levels: {:?} after {} iterations",
        evaluated.len(),
        levels.len(),
        outcome,
        iterations
    );
    if outcome != Outcome::Converged && config.failure_policy == FailurePolicy::RevertToInitial {
        skeleton.set_positions(initial.clone())?;
        let evaluated = evaluate(&levels, &*skeleton, &initial)?;
        return Ok(report(outcome, iterations, &evaluated, config));
    }
    Ok(report(outcome, iterations, &evaluated, config))
}

/// The set of IK tasks of one skeleton, solved together.
#[derive(Debug, Default)]
pub struct HierarchicalIk {
    tasks: Vec<Option<IkTask>>,
    config: SolverConfig,
}

impl HierarchicalIk {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            tasks: Vec::new(),
            config,
        }
    }

    pub fn add_task(&mut self, task: IkTask) -> TaskId {
        self.tasks.push(Some(task));
        TaskId(self.tasks.len() - 1)
    }

    pub fn task(&self, id: TaskId) -> Option<&IkTask> {
        self.tasks.get(id.0).and_then(Option::as_ref)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut IkTask> {
        self.tasks.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Ids of removed tasks are not reused.
    pub fn remove_task(&mut self, id: TaskId) -> Option<IkTask> {
        self.tasks.get_mut(id.0).and_then(Option::take)
    }

    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &IkTask)> {
        self.tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| task.as_ref().map(|task| (TaskId(index), task)))
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SolverConfig) {
        self.config = config;
    }

    /// Solve every active task. The returned report indexes tasks by
    /// [`TaskId`].
    pub fn solve(&self, skeleton: &mut dyn Kinematics) -> Result<SolveReport, IkError> {
        let (ids, tasks): (Vec<TaskId>, Vec<&IkTask>) = self.tasks().unzip();
        let mut report = solve_tasks(&tasks, skeleton, &self.config)?;
        for task in &mut report.tasks {
            task.index = ids[task.index].0;
        }
        Ok(report)
    }
}
