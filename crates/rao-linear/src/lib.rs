//! # rao-linear
//!
//! Continuous sub-problem of a search tree leaf: problem fillers assemble a
//! solver-neutral linear problem, a [`LinearSolver`] solves it, setpoints are
//! rounded to admissible positions and the [`IteratingLinearOptimizer`]
//! repeats this around fresh sensitivities until the cost stops improving.

mod fillers;
mod iterating;
mod objective;
mod problem;
mod rounding;
mod solver;

pub use fillers::{
    loop_flow_limit, mnec_allowed_margin, CoreProblemFiller, FillerInput, LeafProblem,
    MaxLoopFlowFiller, MaxMinMarginFiller, MnecFiller, ProblemFiller, UnoptimizedCnecFiller,
};
pub use iterating::{
    apply_setpoints, IteratingLinearOptimizer, LinearOptimizationInput, LinearOptimizationResult,
};
pub use objective::{
    ObjectiveEvaluation, ObjectiveFunction, LOOP_FLOW_COST, MNEC_COST, UNOPTIMIZED_CNEC_COST,
};
pub use problem::{LinearConstraint, LinearProblem, LinearVariable, VarId};
pub use rounding::round_setpoints;
pub use solver::{ClarabelSolver, LinearProblemStatus, LinearSolution, LinearSolver};
