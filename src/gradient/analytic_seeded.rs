use std::sync::Arc;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::{check_dofs, GradientMethod, JacobianMethod, StepInput};
use crate::analytic::{
    validate_solver, wrap_angle, AnalyticSolver, CandidateSelector, CandidateSet, NearestToCurrent,
    RankedCandidate,
};
use crate::config::JacobianStep;
use crate::error::{IkError, Mismatch};
use crate::kinematics::Kinematics;
use crate::multi_body::EndEffectorId;

const LIMIT_TOLERANCE: f64 = 1e-9;

/// Where the values of the solver's free parameters come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeParameterStrategy {
    /// Hold each free joint at its current value. Free joints never move.
    #[default]
    HoldCurrent,
    /// Try the current value plus `samples` evenly spaced values across
    /// each free joint's limits. Free joints may move.
    Sweep { samples: usize },
}

/// Gradient method that jumps toward the nearest closed-form solution.
///
/// Every step calls the bound [`AnalyticSolver`] with the target expressed
/// in the chain base frame, ranks the candidates against the current
/// configuration, and proposes the step to the selected one. When no
/// candidate is usable, or the task does not constrain the full pose, the
/// step comes from the Jacobian fallback instead.
#[derive(Debug)]
pub struct AnalyticSeeded {
    name: String,
    solver: Arc<dyn AnalyticSolver>,
    selector: Box<dyn CandidateSelector>,
    strategy: FreeParameterStrategy,
    fallback: JacobianMethod,
    requested_chain: Option<Vec<usize>>,
    chain: Vec<usize>,
    dofs: Vec<usize>,
}

impl AnalyticSeeded {
    pub fn new(solver: Arc<dyn AnalyticSolver>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            solver,
            selector: Box::new(NearestToCurrent),
            strategy: FreeParameterStrategy::default(),
            fallback: JacobianMethod::default(),
            requested_chain: None,
            chain: Vec::new(),
            dofs: Vec::new(),
        }
    }

    /// Bind the solver's joints to these skeleton dofs instead of the
    /// end-effector chain. The first dof's parent link is the solver base.
    pub fn with_chain(mut self, dofs: Vec<usize>) -> Self {
        self.requested_chain = Some(dofs);
        self
    }

    pub fn with_selector(mut self, selector: impl CandidateSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn with_free_parameters(mut self, strategy: FreeParameterStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_fallback(mut self, step: JacobianStep) -> Self {
        self.fallback = JacobianMethod::new(step);
        self
    }

    pub fn solver(&self) -> &Arc<dyn AnalyticSolver> {
        &self.solver
    }

    /// Skeleton dofs of every solver joint, in solver order.
    pub fn chain(&self) -> &[usize] {
        &self.chain
    }

    /// Skeleton dofs the solver treats as free parameters.
    pub fn free_dofs(&self) -> Vec<usize> {
        self.solver
            .free_parameters()
            .iter()
            .filter_map(|&index| self.chain.get(index).copied())
            .collect()
    }

    /// Measure every candidate against the current configuration.
    pub fn rank(
        &self,
        skeleton: &dyn Kinematics,
        positions: &DVector<f64>,
        set: &CandidateSet,
    ) -> Result<Vec<RankedCandidate>, IkError> {
        let mut ranked = Vec::with_capacity(set.len());
        for candidate in set {
            if candidate.joints.len() != self.chain.len() {
                return Err(Mismatch::JointCount {
                    expected: self.chain.len(),
                    got: candidate.joints.len(),
                }
                .into());
            }
            let mut joints = Vec::with_capacity(self.chain.len());
            let mut distance = 0.;
            let mut within_limits = true;
            for (&dof, &value) in self.chain.iter().zip(candidate.joints.iter()) {
                let current = positions[dof];
                let limit = skeleton.joint_limit(dof)?;
                let mut value = value;
                if skeleton.is_revolute(dof) {
                    let nearest = current + wrap_angle(value - current);
                    if limit.contains(nearest, LIMIT_TOLERANCE)
                        || !limit.contains(value, LIMIT_TOLERANCE)
                    {
                        value = nearest;
                    }
                }
                within_limits &= limit.contains(value, LIMIT_TOLERANCE);
                distance += (value - current).powi(2);
                joints.push(value);
            }
            ranked.push(RankedCandidate {
                branch: candidate.branch,
                joints,
                distance,
                within_limits,
            });
        }
        Ok(ranked)
    }

    fn free_value_sets(
        &self,
        skeleton: &dyn Kinematics,
        positions: &DVector<f64>,
    ) -> Result<Vec<Vec<f64>>, IkError> {
        let free_dofs = self.free_dofs();
        let current: Vec<f64> = free_dofs.iter().map(|&dof| positions[dof]).collect();
        let samples = match self.strategy {
            FreeParameterStrategy::HoldCurrent => return Ok(vec![current]),
            FreeParameterStrategy::Sweep { samples } => samples,
        };

        let mut sets = vec![Vec::new()];
        for &dof in &free_dofs {
            let limit = skeleton.joint_limit(dof)?;
            let values: Vec<f64> = match samples {
                0 => Vec::new(),
                1 => vec![0.5 * (limit.lower + limit.upper)],
                n => (0..n)
                    .map(|i| limit.lower + (limit.upper - limit.lower) * i as f64 / (n - 1) as f64)
                    .collect(),
            };
            sets = sets
                .into_iter()
                .flat_map(|prefix: Vec<f64>| {
                    values.iter().map(move |&v| {
                        let mut next = prefix.clone();
                        next.push(v);
                        next
                    })
                })
                .collect();
        }
        if free_dofs.is_empty() || samples == 0 {
            sets.clear();
        }
        sets.insert(0, current);
        Ok(sets)
    }
}

impl GradientMethod for AnalyticSeeded {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, skeleton: &dyn Kinematics, ee: EndEffectorId) -> Result<(), IkError> {
        validate_solver(self.solver.as_ref())?;
        let chain = match &self.requested_chain {
            Some(dofs) => dofs.clone(),
            None => skeleton.chain_dofs(ee)?,
        };
        if chain.len() != self.solver.num_joints() {
            log::warn!(
                "{}: solver expects {} joints, chain has {}",
                self.name,
                self.solver.num_joints(),
                chain.len()
            );
            return Err(Mismatch::JointCount {
                expected: self.solver.num_joints(),
                got: chain.len(),
            }
            .into());
        }
        check_dofs(&chain, skeleton.num_dofs())?;

        let free = self.solver.free_parameters();
        self.dofs = match self.strategy {
            FreeParameterStrategy::HoldCurrent => chain
                .iter()
                .enumerate()
                .filter(|(index, _)| !free.contains(index))
                .map(|(_, &dof)| dof)
                .collect(),
            FreeParameterStrategy::Sweep { .. } => chain.clone(),
        };
        self.chain = chain;
        log::debug!(
            "{}: bound chain {:?}, free dofs {:?}",
            self.name,
            self.chain,
            self.free_dofs()
        );
        Ok(())
    }

    fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    fn propose_step(&self, input: &StepInput<'_>) -> Result<DVector<f64>, IkError> {
        let Some(&base_dof) = self.chain.first() else {
            return Err(Mismatch::JointCount {
                expected: self.solver.num_joints(),
                got: 0,
            }
            .into());
        };
        if !input.axes.is_full() {
            log::trace!("{}: partial pose constraint, using Jacobian step", self.name);
            return self.fallback.step_for(&self.dofs, input);
        }

        let base = input.skeleton.dof_parent_pose(base_dof, input.positions)?;
        let local_target = base.inverse() * input.target;

        let mut ranked = Vec::new();
        for free in self.free_value_sets(input.skeleton, input.positions)? {
            let set = self.solver.solve(&local_target, &free)?;
            ranked.extend(self.rank(input.skeleton, input.positions, &set)?);
        }

        let Some(chosen) = self.selector.select(&ranked).and_then(|i| ranked.get(i)) else {
            log::debug!(
                "{}: no usable closed-form candidate ({} ranked), using Jacobian step",
                self.name,
                ranked.len()
            );
            return self.fallback.step_for(&self.dofs, input);
        };
        log::trace!(
            "{}: branch {} at distance {:.3e}",
            self.name,
            chosen.branch,
            chosen.distance
        );

        let mut step = DVector::zeros(input.skeleton.num_dofs());
        for (&dof, &value) in self.chain.iter().zip(chosen.joints.iter()) {
            if self.dofs.contains(&dof) {
                step[dof] = value - input.positions[dof];
            }
        }
        Ok(step)
    }
}
