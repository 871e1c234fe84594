//! Problem fillers: each one adds its variables, constraints and objective
//! terms to the linear problem of a leaf.

use std::collections::BTreeMap;

use rao_types::{
    Cnec, LinearOptimizerParameters, ObjectiveParameters, OptimizationPerimeter,
    PrePerimeterState, RangeAction, RangeActionActivation, RangeActionKind, SensitivityResult,
};
use tracing::debug;

use crate::problem::{
    absolute_variation_variable, flow_variable, loop_flow_violation_variable,
    mnec_violation_variable, setpoint_variable, unoptimized_violation_variable, LinearProblem,
    VarId, MIN_MARGIN_VARIABLE,
};

const INF: f64 = f64::INFINITY;

/// Everything a filler may read while building a leaf's problem.
#[derive(Debug, Clone, Copy)]
pub struct FillerInput<'a> {
    pub perimeter: &'a OptimizationPerimeter,
    /// Range actions left after filtering; only these get variables.
    pub range_actions: &'a [RangeAction],
    pub sensitivity: &'a SensitivityResult,
    /// Setpoints of the network state the sensitivities were computed on.
    pub reference: &'a RangeActionActivation,
    pub pre_perimeter: &'a PrePerimeterState,
}

impl FillerInput<'_> {
    fn reference_setpoint(&self, ra: &RangeAction) -> f64 {
        self.reference
            .setpoint(&ra.id)
            .or_else(|| self.pre_perimeter.setpoint(&ra.id))
            .unwrap_or_else(|| ra.clamp(0.0))
    }
}

/// Common trait for all problem fillers.
pub trait ProblemFiller: Send + Sync {
    fn fill(&self, problem: &mut LinearProblem, input: &FillerInput<'_>);

    fn name(&self) -> &str;
}

fn flow_var(problem: &LinearProblem, cnec: &Cnec) -> Option<VarId> {
    problem.variable(&flow_variable(&cnec.id))
}

// ---- Core ----

/// Setpoint, variation and flow variables plus aligned-group equalities.
#[derive(Debug, Clone)]
pub struct CoreProblemFiller {
    penalties: LinearOptimizerParameters,
}

impl CoreProblemFiller {
    pub fn new(penalties: LinearOptimizerParameters) -> Self {
        Self { penalties }
    }

    fn penalty(&self, ra: &RangeAction) -> f64 {
        match ra.kind {
            RangeActionKind::Pst { .. } => self.penalties.pst_penalty_cost,
            RangeActionKind::Hvdc => self.penalties.hvdc_penalty_cost,
            RangeActionKind::Injection => self.penalties.injection_penalty_cost,
        }
    }
}

impl ProblemFiller for CoreProblemFiller {
    fn fill(&self, problem: &mut LinearProblem, input: &FillerInput<'_>) {
        let mut setpoints = BTreeMap::new();
        for ra in input.range_actions {
            let set = problem.add_variable(setpoint_variable(&ra.id), ra.min_setpoint, ra.max_setpoint);
            let abs = problem.add_variable(absolute_variation_variable(&ra.id), 0.0, INF);
            let initial = input
                .pre_perimeter
                .setpoint(&ra.id)
                .unwrap_or_else(|| input.reference_setpoint(ra));
            // abs >= |set - initial|
            problem.add_constraint(
                format!("variation_above_{}", ra.id),
                vec![(abs, 1.0), (set, -1.0)],
                -initial,
                INF,
            );
            problem.add_constraint(
                format!("variation_below_{}", ra.id),
                vec![(abs, 1.0), (set, 1.0)],
                initial,
                INF,
            );
            problem.add_objective_term(abs, self.penalty(ra));
            setpoints.insert(ra.id.as_str(), (set, input.reference_setpoint(ra)));
        }

        for cnec in &input.perimeter.cnecs {
            let Some(reference_flow) = input.sensitivity.flow(&cnec.id) else {
                continue;
            };
            let flow = problem.add_variable(flow_variable(&cnec.id), -INF, INF);
            // flow = F_ref + Σ s·(set - set_ref)
            let mut terms = vec![(flow, 1.0)];
            let mut rhs = reference_flow;
            for ra in input.range_actions {
                let s = input.sensitivity.sensitivity(&cnec.id, &ra.id);
                if s == 0.0 {
                    continue;
                }
                let (set, reference) = setpoints[ra.id.as_str()];
                terms.push((set, -s));
                rhs -= s * reference;
            }
            problem.add_constraint(format!("flow_{}", cnec.id), terms, rhs, rhs);
        }

        let mut groups: BTreeMap<&str, Vec<VarId>> = BTreeMap::new();
        for ra in input.range_actions {
            if let Some(group) = ra.group_id.as_deref() {
                groups.entry(group).or_default().push(setpoints[ra.id.as_str()].0);
            }
        }
        for (group, members) in groups {
            for (i, pair) in members.windows(2).enumerate() {
                problem.add_constraint(
                    format!("aligned_{group}_{i}"),
                    vec![(pair[0], 1.0), (pair[1], -1.0)],
                    0.0,
                    0.0,
                );
            }
        }
    }

    fn name(&self) -> &str {
        "core"
    }
}

// ---- Max-min margin ----

/// Maximises the smallest (optionally PTDF-weighted) margin of optimized CNECs.
#[derive(Debug, Clone)]
pub struct MaxMinMarginFiller {
    parameters: ObjectiveParameters,
}

impl MaxMinMarginFiller {
    pub fn new(parameters: ObjectiveParameters) -> Self {
        Self { parameters }
    }

    fn is_eligible(&self, cnec: &Cnec) -> bool {
        cnec.optimized
            && (cnec.upper_threshold.is_some() || cnec.lower_threshold.is_some())
            && !cnec
                .operator
                .as_ref()
                .is_some_and(|op| self.parameters.operators_not_to_optimize.contains(op))
    }
}

impl ProblemFiller for MaxMinMarginFiller {
    fn fill(&self, problem: &mut LinearProblem, input: &FillerInput<'_>) {
        let cnecs: Vec<(&Cnec, VarId)> = input
            .perimeter
            .cnecs
            .iter()
            .filter(|c| self.is_eligible(c))
            .filter_map(|c| flow_var(problem, c).map(|v| (c, v)))
            .collect();
        if cnecs.is_empty() {
            debug!("no optimized CNEC with a flow, min margin not created");
            return;
        }

        let margin = problem.add_variable(MIN_MARGIN_VARIABLE, -INF, INF);
        for (cnec, flow) in cnecs {
            let weight = if self.parameters.is_relative() {
                input
                    .sensitivity
                    .ptdf_sum(&cnec.id)
                    .unwrap_or(1.0)
                    .max(self.parameters.ptdf_sum_lower_bound)
            } else {
                1.0
            };
            if let Some(upper) = cnec.upper_threshold {
                problem.add_constraint(
                    format!("min_margin_upper_{}", cnec.id),
                    vec![(margin, weight), (flow, 1.0)],
                    -INF,
                    upper,
                );
            }
            if let Some(lower) = cnec.lower_threshold {
                problem.add_constraint(
                    format!("min_margin_lower_{}", cnec.id),
                    vec![(margin, weight), (flow, -1.0)],
                    -INF,
                    -lower,
                );
            }
        }
        problem.add_objective_term(margin, -1.0);
    }

    fn name(&self) -> &str {
        "max-min-margin"
    }
}

// ---- MNEC ----

/// Margin a monitored element may not go below without penalty.
pub fn mnec_allowed_margin(cnec: &Cnec, initial_flow: f64, acceptable_decrease: f64) -> f64 {
    (cnec.margin(initial_flow) - acceptable_decrease).min(0.0)
}

/// Soft constraint keeping monitored elements close to their initial margin.
#[derive(Debug, Clone)]
pub struct MnecFiller {
    parameters: ObjectiveParameters,
}

impl MnecFiller {
    pub fn new(parameters: ObjectiveParameters) -> Self {
        Self { parameters }
    }
}

impl ProblemFiller for MnecFiller {
    fn fill(&self, problem: &mut LinearProblem, input: &FillerInput<'_>) {
        for cnec in input.perimeter.monitored_cnecs() {
            let (Some(flow), Some(initial_flow)) =
                (flow_var(problem, cnec), input.pre_perimeter.flow(&cnec.id))
            else {
                continue;
            };
            let allowed = mnec_allowed_margin(
                cnec,
                initial_flow,
                self.parameters.mnec_acceptable_margin_decrease,
            );
            let violation = problem.add_variable(mnec_violation_variable(&cnec.id), 0.0, INF);
            if let Some(upper) = cnec.upper_threshold {
                problem.add_constraint(
                    format!("mnec_upper_{}", cnec.id),
                    vec![(flow, 1.0), (violation, -1.0)],
                    -INF,
                    upper - allowed,
                );
            }
            if let Some(lower) = cnec.lower_threshold {
                problem.add_constraint(
                    format!("mnec_lower_{}", cnec.id),
                    vec![(flow, 1.0), (violation, 1.0)],
                    lower + allowed,
                    INF,
                );
            }
            problem.add_objective_term(violation, self.parameters.mnec_violation_cost);
        }
    }

    fn name(&self) -> &str {
        "mnec"
    }
}

// ---- Loop flows ----

/// Loop-flow limit of a CNEC given its initial loop flow.
pub fn loop_flow_limit(threshold: f64, initial_loop_flow: Option<f64>, augmentation: f64) -> f64 {
    match initial_loop_flow {
        Some(initial) => threshold.max(initial.abs() + augmentation),
        None => threshold,
    }
}

/// Soft bound on `|flow - commercial flow|` for loop-flow CNECs.
#[derive(Debug, Clone)]
pub struct MaxLoopFlowFiller {
    parameters: ObjectiveParameters,
}

impl MaxLoopFlowFiller {
    pub fn new(parameters: ObjectiveParameters) -> Self {
        Self { parameters }
    }
}

impl ProblemFiller for MaxLoopFlowFiller {
    fn fill(&self, problem: &mut LinearProblem, input: &FillerInput<'_>) {
        for cnec in input.perimeter.loop_flow_cnecs() {
            let (Some(flow), Some(threshold)) = (flow_var(problem, cnec), cnec.loop_flow_threshold)
            else {
                continue;
            };
            let limit = loop_flow_limit(
                threshold,
                input.pre_perimeter.loop_flow(&cnec.id),
                self.parameters.loop_flow_acceptable_augmentation,
            );
            let commercial = input.sensitivity.commercial_flow(&cnec.id);
            let violation = problem.add_variable(loop_flow_violation_variable(&cnec.id), 0.0, INF);
            problem.add_constraint(
                format!("loop_flow_upper_{}", cnec.id),
                vec![(flow, 1.0), (violation, -1.0)],
                -INF,
                commercial + limit,
            );
            problem.add_constraint(
                format!("loop_flow_lower_{}", cnec.id),
                vec![(flow, 1.0), (violation, 1.0)],
                commercial - limit,
                INF,
            );
            problem.add_objective_term(violation, self.parameters.loop_flow_violation_cost);
        }
    }

    fn name(&self) -> &str {
        "max-loop-flow"
    }
}

// ---- Unoptimized CNECs ----

/// CNECs of operators that are not optimized only need to keep their
/// pre-perimeter margin; any decrease is penalised.
#[derive(Debug, Clone)]
pub struct UnoptimizedCnecFiller {
    parameters: ObjectiveParameters,
}

impl UnoptimizedCnecFiller {
    pub fn new(parameters: ObjectiveParameters) -> Self {
        Self { parameters }
    }
}

impl ProblemFiller for UnoptimizedCnecFiller {
    fn fill(&self, problem: &mut LinearProblem, input: &FillerInput<'_>) {
        let not_optimized = &self.parameters.operators_not_to_optimize;
        for cnec in input.perimeter.optimized_cnecs() {
            if !cnec.operator.as_ref().is_some_and(|op| not_optimized.contains(op)) {
                continue;
            }
            let (Some(flow), Some(initial_flow)) =
                (flow_var(problem, cnec), input.pre_perimeter.flow(&cnec.id))
            else {
                continue;
            };
            let initial_margin = cnec.margin(initial_flow);
            if !initial_margin.is_finite() {
                continue;
            }
            let violation = problem.add_variable(unoptimized_violation_variable(&cnec.id), 0.0, INF);
            if let Some(upper) = cnec.upper_threshold {
                problem.add_constraint(
                    format!("unoptimized_upper_{}", cnec.id),
                    vec![(flow, 1.0), (violation, -1.0)],
                    -INF,
                    upper - initial_margin,
                );
            }
            if let Some(lower) = cnec.lower_threshold {
                problem.add_constraint(
                    format!("unoptimized_lower_{}", cnec.id),
                    vec![(flow, 1.0), (violation, 1.0)],
                    lower + initial_margin,
                    INF,
                );
            }
            problem.add_objective_term(violation, self.parameters.unoptimized_cnec_cost);
        }
    }

    fn name(&self) -> &str {
        "unoptimized-cnec"
    }
}

// ---------------------------------------------------------------------------
// Leaf problem
// ---------------------------------------------------------------------------

/// Ordered set of fillers producing the continuous problem of one leaf.
pub struct LeafProblem {
    fillers: Vec<Box<dyn ProblemFiller>>,
}

impl LeafProblem {
    pub fn new(objective: &ObjectiveParameters, linear: &LinearOptimizerParameters) -> Self {
        let mut fillers: Vec<Box<dyn ProblemFiller>> = vec![
            Box::new(CoreProblemFiller::new(linear.clone())),
            Box::new(MaxMinMarginFiller::new(objective.clone())),
            Box::new(MnecFiller::new(objective.clone())),
            Box::new(MaxLoopFlowFiller::new(objective.clone())),
        ];
        if !objective.operators_not_to_optimize.is_empty() {
            fillers.push(Box::new(UnoptimizedCnecFiller::new(objective.clone())));
        }
        Self { fillers }
    }

    pub fn with_filler(mut self, filler: Box<dyn ProblemFiller>) -> Self {
        self.fillers.push(filler);
        self
    }

    pub fn filler_names(&self) -> Vec<&str> {
        self.fillers.iter().map(|f| f.name()).collect()
    }

    pub fn assemble(&self, input: &FillerInput<'_>) -> LinearProblem {
        let mut problem = LinearProblem::new();
        for filler in &self.fillers {
            filler.fill(&mut problem, input);
        }
        debug!(
            variables = problem.variables().len(),
            constraints = problem.constraints().len(),
            "leaf problem assembled"
        );
        problem
    }
}
