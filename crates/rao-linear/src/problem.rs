//! Solver-neutral linear problem assembled by the fillers.

use std::collections::HashMap;

use rao_types::SolverError;

/// Handle to a variable of a [`LinearProblem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearVariable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

/// `lower <= Σ coef·var <= upper`; infinite bounds are omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub terms: Vec<(VarId, f64)>,
    pub lower: f64,
    pub upper: f64,
}

/// A minimisation problem over bounded continuous variables.
#[derive(Debug, Clone, Default)]
pub struct LinearProblem {
    variables: Vec<LinearVariable>,
    by_name: HashMap<String, VarId>,
    constraints: Vec<LinearConstraint>,
    objective: Vec<(VarId, f64)>,
}

impl LinearProblem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, or returns the existing one with the same name.
    pub fn add_variable(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        let name = name.into();
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let id = VarId(self.variables.len());
        self.variables.push(LinearVariable {
            name: name.clone(),
            lower,
            upper,
        });
        self.by_name.insert(name, id);
        id
    }

    pub fn variable(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn variables(&self) -> &[LinearVariable] {
        &self.variables
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(VarId, f64)>,
        lower: f64,
        upper: f64,
    ) {
        self.constraints.push(LinearConstraint {
            name: name.into(),
            terms,
            lower,
            upper,
        });
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn constraint(&self, name: &str) -> Option<&LinearConstraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Adds `coefficient·var` to the objective.
    pub fn add_objective_term(&mut self, var: VarId, coefficient: f64) {
        match self.objective.iter_mut().find(|(v, _)| *v == var) {
            Some((_, c)) => *c += coefficient,
            None => self.objective.push((var, coefficient)),
        }
    }

    pub fn objective(&self) -> &[(VarId, f64)] {
        &self.objective
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Rejects NaN coefficients and bounds, which a NaN sensitivity would
    /// otherwise carry into the solver.
    pub fn validate(&self) -> Result<(), SolverError> {
        let invalid = |message: String| Err(SolverError::InvalidProblem { message });
        for v in &self.variables {
            if v.lower.is_nan() || v.upper.is_nan() || v.lower > v.upper {
                return invalid(format!("variable {} has bounds [{}, {}]", v.name, v.lower, v.upper));
            }
        }
        for c in &self.constraints {
            if c.lower.is_nan() || c.upper.is_nan() {
                return invalid(format!("constraint {} has a NaN bound", c.name));
            }
            if c.terms.iter().any(|(_, coefficient)| !coefficient.is_finite()) {
                return invalid(format!("constraint {} has a non-finite coefficient", c.name));
            }
        }
        if self.objective.iter().any(|(_, coefficient)| !coefficient.is_finite()) {
            return invalid("objective has a non-finite coefficient".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Variable naming
// ---------------------------------------------------------------------------

pub fn setpoint_variable(range_action_id: &str) -> String {
    format!("setpoint_{range_action_id}")
}

pub fn absolute_variation_variable(range_action_id: &str) -> String {
    format!("absolute_variation_{range_action_id}")
}

pub fn flow_variable(cnec_id: &str) -> String {
    format!("flow_{cnec_id}")
}

pub const MIN_MARGIN_VARIABLE: &str = "min_margin";

pub fn mnec_violation_variable(cnec_id: &str) -> String {
    format!("mnec_violation_{cnec_id}")
}

pub fn loop_flow_violation_variable(cnec_id: &str) -> String {
    format!("loop_flow_violation_{cnec_id}")
}

pub fn unoptimized_violation_variable(cnec_id: &str) -> String {
    format!("unoptimized_violation_{cnec_id}")
}
