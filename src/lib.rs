//! # hik is a library for prioritized inverse kinematics of multi-body.
//! hik = hierarchical + inverse kinematics
//!
//! A [`MultiBody`] skeleton exposes forward kinematics and Jacobians through
//! the [`Kinematics`] trait. Each [`IkTask`] binds one end effector to a
//! target [`FrameRef`] and a [`GradientMethod`], and [`HierarchicalIk`]
//! resolves all active tasks by priority level with nullspace projection.
//!
//! ```text
//! FrameRef ──► IkTask(level, GradientMethod) ──► HierarchicalIk ──► MultiBody
//!                      │
//!                      └── AnalyticSeeded ──► AnalyticSolver (SolverRegistry)
//! ```

// #![deny(missing_docs)]
#![deny(unsafe_code)]

mod analytic;
mod config;
mod error;
mod frame;
mod gradient;
mod hierarchy;
mod kinematics;
mod multi_body;
mod task;

pub use analytic::{
    validate_solver, AnalyticSolver, Candidate, CandidateSelector, CandidateSet,
    FirstWithinLimits, NearestToCurrent, RankedCandidate, SolverRegistry, SrsArm, SrsGeometry,
};
pub use config::{ConstrainedAxes, FailurePolicy, JacobianStep, SolverConfig};
pub use error::{IkError, Mismatch};
pub use frame::{pose_error, Frame, FrameRef};
pub use gradient::{
    AnalyticSeeded, FreeParameterStrategy, GradientMethod, JacobianMethod, StepInput,
};
pub use hierarchy::{
    clamp_step, solve_tasks, HierarchicalIk, NullspaceFold, Outcome, SolveReport, TaskId,
    TaskReport,
};
pub use kinematics::{pseudo_inverse, stack_rows, Kinematics};
pub use multi_body::{EndEffector, EndEffectorId, Joint, JointKind, JointLimit, Link, MultiBody};
pub use task::{IkTask, TaskError};
