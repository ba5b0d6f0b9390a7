//! Closed-form inverse kinematics for fixed joint chains.
//!
//! An [`AnalyticSolver`] is a pure oracle: for a target pose and values of
//! its free parameters it returns every joint tuple that reaches the pose.
//! It knows nothing about the current configuration; picking one candidate
//! is the job of a [`CandidateSelector`].

mod srs;

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use nalgebra::Isometry3;

use crate::error::{IkError, Mismatch};

pub(crate) use self::srs::wrap_angle;
pub use self::srs::{SrsArm, SrsGeometry};

/// Closed-form solver generated for one joint chain.
pub trait AnalyticSolver: Debug + Send + Sync {
    /// Number of joints in the chain, free parameters included.
    fn num_joints(&self) -> usize;

    /// Chain indices the closed-form equations do not determine.
    fn free_parameters(&self) -> &[usize];

    fn num_free_parameters(&self) -> usize {
        self.free_parameters().len()
    }

    /// Every joint tuple reaching `target`, expressed in the chain base
    /// frame, with the free joints held at `free`.
    ///
    /// Tuples have [`num_joints`](Self::num_joints) entries; the free
    /// entries equal the supplied values. An empty set means the pose is
    /// out of reach for these free values.
    fn solve(&self, target: &Isometry3<f64>, free: &[f64]) -> Result<CandidateSet, IkError>;
}

/// Check the free parameter metadata of a solver.
pub fn validate_solver(solver: &dyn AnalyticSolver) -> Result<(), IkError> {
    let num_joints = solver.num_joints();
    let mut seen = HashSet::new();
    for &index in solver.free_parameters() {
        if index >= num_joints {
            return Err(Mismatch::FreeParameterIndex { index, num_joints }.into());
        }
        if !seen.insert(index) {
            return Err(Mismatch::DuplicateFreeParameter(index).into());
        }
    }
    Ok(())
}

pub(crate) fn check_free_values(solver: &dyn AnalyticSolver, free: &[f64]) -> Result<(), IkError> {
    if free.len() != solver.num_free_parameters() {
        return Err(Mismatch::FreeParameterCount {
            expected: solver.num_free_parameters(),
            got: free.len(),
        }
        .into());
    }
    Ok(())
}

/// One closed-form solution, tagged with the branch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub joints: Vec<f64>,
    /// Solver-specific branch id (e.g. one bit per elbow/shoulder/wrist flip).
    pub branch: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    pub fn extend(&mut self, other: CandidateSet) {
        self.candidates.extend(other.candidates);
    }
}

impl IntoIterator for CandidateSet {
    type Item = Candidate;
    type IntoIter = std::vec::IntoIter<Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        Self {
            candidates: iter.into_iter().collect(),
        }
    }
}

/// A candidate measured against the current configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub branch: u32,
    /// Joint values, with angles shifted by whole turns to lie closest to
    /// the current configuration.
    pub joints: Vec<f64>,
    /// Sum of squared joint differences to the current configuration.
    pub distance: f64,
    pub within_limits: bool,
}

/// Picks one candidate out of a ranked set.
pub trait CandidateSelector: Debug + Send + Sync {
    /// Index of the chosen candidate, or `None` to reject them all.
    fn select(&self, ranked: &[RankedCandidate]) -> Option<usize>;
}

/// Closest candidate inside the joint limits; if none is inside, the
/// closest overall. Ties go to the lowest branch id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestToCurrent;

impl CandidateSelector for NearestToCurrent {
    fn select(&self, ranked: &[RankedCandidate]) -> Option<usize> {
        ranked
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                b.within_limits
                    .cmp(&a.within_limits)
                    .then(a.distance.total_cmp(&b.distance))
                    .then(a.branch.cmp(&b.branch))
            })
            .map(|(index, _)| index)
    }
}

/// First candidate inside the joint limits, in solver order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWithinLimits;

impl CandidateSelector for FirstWithinLimits {
    fn select(&self, ranked: &[RankedCandidate]) -> Option<usize> {
        ranked.iter().position(|candidate| candidate.within_limits)
    }
}

/// Analytic solvers by name.
///
/// Resolving a name is the only way to obtain a solver; an unknown name is
/// an error rather than an empty solver.
#[derive(Debug, Clone, Default)]
pub struct SolverRegistry {
    solvers: HashMap<String, Arc<dyn AnalyticSolver>>,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `solver` under `name`, returning the solver it replaces.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        solver: impl AnalyticSolver + 'static,
    ) -> Result<Option<Arc<dyn AnalyticSolver>>, IkError> {
        self.register_shared(name, Arc::new(solver))
    }

    pub fn register_shared(
        &mut self,
        name: impl Into<String>,
        solver: Arc<dyn AnalyticSolver>,
    ) -> Result<Option<Arc<dyn AnalyticSolver>>, IkError> {
        validate_solver(solver.as_ref())?;
        let name = name.into();
        log::debug!(
            "registered analytic solver {name}: {} joints, free {:?}",
            solver.num_joints(),
            solver.free_parameters()
        );
        Ok(self.solvers.insert(name, solver))
    }

    pub fn load(&self, name: &str) -> Result<Arc<dyn AnalyticSolver>, IkError> {
        self.solvers
            .get(name)
            .cloned()
            .ok_or_else(|| IkError::SolverNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.solvers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.solvers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
