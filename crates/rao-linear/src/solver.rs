//! Linear solver seam and the clarabel backend.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use good_lp::solvers::clarabel::clarabel;
use good_lp::{
    constraint, variable, variables, Expression, ResolutionError, Solution, SolverModel, Variable,
};
use rao_types::SolverError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::problem::LinearProblem;

/// Outcome of one continuous optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearProblemStatus {
    Optimal,
    Feasible,
    Infeasible,
    Abnormal,
    SensitivityComputationFailed,
    MaxIterationReached,
}

impl LinearProblemStatus {
    pub fn has_solution(self) -> bool {
        matches!(self, Self::Optimal | Self::Feasible)
    }
}

/// Status plus variable values by name (empty when there is no solution).
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolution {
    pub status: LinearProblemStatus,
    pub values: HashMap<String, f64>,
}

impl LinearSolution {
    pub fn failed(status: LinearProblemStatus) -> Self {
        Self {
            status,
            values: HashMap::new(),
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// A linear programming backend. Solving never raises: every failure is
/// reported through the returned status.
pub trait LinearSolver: Send + Sync {
    fn solve(&self, problem: &LinearProblem) -> LinearSolution;

    fn name(&self) -> &str;
}

/// Interior-point solver from the clarabel crate, driven through good_lp.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelSolver;

impl ClarabelSolver {
    pub fn new() -> Self {
        Self
    }

    fn solve_inner(problem: &LinearProblem) -> LinearSolution {
        let mut vars = variables!();
        let handles: Vec<Variable> = problem
            .variables()
            .iter()
            .map(|v| {
                let mut definition = variable();
                if v.lower.is_finite() {
                    definition = definition.min(v.lower);
                }
                if v.upper.is_finite() {
                    definition = definition.max(v.upper);
                }
                vars.add(definition)
            })
            .collect();

        let mut objective = Expression::from(0.0);
        for (var, coefficient) in problem.objective() {
            objective += *coefficient * handles[var.index()];
        }

        let mut model = vars.minimise(objective).using(clarabel);
        for c in problem.constraints() {
            let mut expression = Expression::from(0.0);
            for (var, coefficient) in &c.terms {
                expression += *coefficient * handles[var.index()];
            }
            if c.lower.is_finite() && c.lower == c.upper {
                model = model.with(constraint!(expression == c.lower));
                continue;
            }
            if c.lower.is_finite() {
                model = model.with(constraint!(expression.clone() >= c.lower));
            }
            if c.upper.is_finite() {
                model = model.with(constraint!(expression <= c.upper));
            }
        }

        match model.solve() {
            Ok(solution) => {
                let values = problem
                    .variables()
                    .iter()
                    .zip(&handles)
                    .map(|(v, h)| (v.name.clone(), solution.value(*h)))
                    .collect();
                LinearSolution {
                    status: LinearProblemStatus::Optimal,
                    values,
                }
            }
            Err(ResolutionError::Infeasible) => {
                debug!("linear problem is infeasible");
                LinearSolution::failed(LinearProblemStatus::Infeasible)
            }
            Err(e) => {
                warn!("{}", SolverError::Backend { message: e.to_string() });
                LinearSolution::failed(LinearProblemStatus::Abnormal)
            }
        }
    }
}

impl LinearSolver for ClarabelSolver {
    fn solve(&self, problem: &LinearProblem) -> LinearSolution {
        if problem.is_empty() {
            return LinearSolution {
                status: LinearProblemStatus::Optimal,
                values: HashMap::new(),
            };
        }
        if let Err(e) = problem.validate() {
            warn!("{}", e);
            return LinearSolution::failed(LinearProblemStatus::Abnormal);
        }
        panic::catch_unwind(AssertUnwindSafe(|| Self::solve_inner(problem))).unwrap_or_else(|_| {
            warn!("linear solver panicked");
            LinearSolution::failed(LinearProblemStatus::Abnormal)
        })
    }

    fn name(&self) -> &str {
        "clarabel"
    }
}
