//! Successive linearisation of the continuous sub-problem.

use rao_types::{
    Network, OptimizationPerimeter, PrePerimeterState, RangeAction, RangeActionActivation,
    SensitivityEngine, SensitivityResult,
};
use tracing::{debug, info, warn};

use crate::fillers::{FillerInput, LeafProblem};
use crate::objective::{ObjectiveEvaluation, ObjectiveFunction};
use crate::rounding::round_setpoints;
use crate::solver::{LinearProblemStatus, LinearSolver};

/// Starting point of one continuous optimization.
#[derive(Debug, Clone, Copy)]
pub struct LinearOptimizationInput<'a> {
    pub perimeter: &'a OptimizationPerimeter,
    /// Range actions left after filtering.
    pub range_actions: &'a [RangeAction],
    pub pre_perimeter: &'a PrePerimeterState,
    /// Setpoints currently applied on the network.
    pub activation: &'a RangeActionActivation,
    pub sensitivity: &'a SensitivityResult,
    pub evaluation: &'a ObjectiveEvaluation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearOptimizationResult {
    pub status: LinearProblemStatus,
    pub activation: RangeActionActivation,
    pub sensitivity: SensitivityResult,
    pub evaluation: ObjectiveEvaluation,
    pub iterations: usize,
}

impl LinearOptimizationResult {
    fn with_status(mut self, status: LinearProblemStatus) -> Self {
        self.status = status;
        self
    }
}

/// Solve, round, re-run sensitivities and keep the best state until the
/// setpoints stop moving or the cost stops decreasing.
pub struct IteratingLinearOptimizer<'a> {
    engine: &'a dyn SensitivityEngine,
    solver: &'a dyn LinearSolver,
    objective: &'a ObjectiveFunction,
    problem: &'a LeafProblem,
    max_iterations: usize,
}

impl<'a> IteratingLinearOptimizer<'a> {
    pub fn new(
        engine: &'a dyn SensitivityEngine,
        solver: &'a dyn LinearSolver,
        objective: &'a ObjectiveFunction,
        problem: &'a LeafProblem,
        max_iterations: usize,
    ) -> Self {
        Self {
            engine,
            solver,
            objective,
            problem,
            max_iterations,
        }
    }

    pub fn optimize(
        &self,
        network: &mut dyn Network,
        input: &LinearOptimizationInput<'_>,
    ) -> LinearOptimizationResult {
        let mut best = LinearOptimizationResult {
            status: LinearProblemStatus::Optimal,
            activation: input.activation.clone(),
            sensitivity: input.sensitivity.clone(),
            evaluation: input.evaluation.clone(),
            iterations: 0,
        };

        for iteration in 1..=self.max_iterations {
            best.iterations = iteration;
            let problem = self.problem.assemble(&FillerInput {
                perimeter: input.perimeter,
                range_actions: input.range_actions,
                sensitivity: &best.sensitivity,
                reference: &best.activation,
                pre_perimeter: input.pre_perimeter,
            });
            let solution = self.solver.solve(&problem);
            if !solution.status.has_solution() {
                if iteration == 1 {
                    warn!(status = ?solution.status, solver = self.solver.name(), "linear problem has no solution");
                    return best.with_status(solution.status);
                }
                debug!(iteration, status = ?solution.status, "keeping previous iteration");
                return best.with_status(LinearProblemStatus::Feasible);
            }

            let candidate = round_setpoints(input.range_actions, &solution, &best.activation);
            if best.activation.agrees_with(&candidate) {
                debug!(iteration, "range action setpoints unchanged");
                return best.with_status(LinearProblemStatus::Optimal);
            }

            if let Err(e) = apply_setpoints(network, input.range_actions, &candidate) {
                warn!("could not apply range action setpoints: {}", e);
                return best.with_status(LinearProblemStatus::Abnormal);
            }
            let sensitivity = match self.engine.compute(&*network, input.perimeter) {
                Ok(s) => s,
                Err(e) => {
                    warn!(iteration, "sensitivity computation failed: {}", e);
                    if let Err(e) = apply_setpoints(network, input.range_actions, &best.activation) {
                        warn!("could not restore range action setpoints: {}", e);
                    }
                    return best.with_status(LinearProblemStatus::SensitivityComputationFailed);
                }
            };
            let evaluation = self.objective.evaluate(input.perimeter, &sensitivity, input.pre_perimeter);

            if evaluation.cost.total() < best.evaluation.cost.total() {
                debug!(
                    iteration,
                    cost = evaluation.cost.total(),
                    previous = best.evaluation.cost.total(),
                    "linear optimization improved"
                );
                best.activation = best.activation.merged_with(&candidate);
                best.sensitivity = sensitivity;
                best.evaluation = evaluation;
            } else {
                info!(
                    iteration,
                    cost = evaluation.cost.total(),
                    best = best.evaluation.cost.total(),
                    "linear optimization did not improve, keeping previous setpoints"
                );
                if let Err(e) = apply_setpoints(network, input.range_actions, &best.activation) {
                    warn!("could not restore range action setpoints: {}", e);
                }
                return best.with_status(LinearProblemStatus::Optimal);
            }
        }
        best.with_status(LinearProblemStatus::MaxIterationReached)
    }
}

/// Applies every setpoint of `activation` that belongs to `range_actions`.
pub fn apply_setpoints(
    network: &mut dyn Network,
    range_actions: &[RangeAction],
    activation: &RangeActionActivation,
) -> Result<(), rao_types::NetworkError> {
    for ra in range_actions {
        if let Some(setpoint) = activation.setpoint(&ra.id) {
            network.apply_range_action(ra, setpoint)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::LinearProblem;
    use crate::solver::{ClarabelSolver, LinearSolution};
    use rao_types::{
        Cnec, Country, LinearOptimizerParameters, NetworkAction, NetworkError, ObjectiveParameters,
        SensitivityError,
    };
    use std::any::Any;
    use std::collections::HashMap;

    /// One HVDC line shifting flow off a single CNEC: flow = 150 - setpoint.
    #[derive(Debug, Clone, Default)]
    struct HvdcNetwork {
        setpoints: HashMap<String, f64>,
    }

    impl Network for HvdcNetwork {
        fn clone_boxed(&self) -> Box<dyn Network> {
            Box::new(self.clone())
        }

        fn apply_network_action(&mut self, _action: &NetworkAction) -> Result<(), NetworkError> {
            Ok(())
        }

        fn apply_range_action(&mut self, action: &RangeAction, setpoint: f64) -> Result<(), NetworkError> {
            self.setpoints.insert(action.id.clone(), setpoint);
            Ok(())
        }

        fn range_action_setpoint(&self, action: &RangeAction) -> f64 {
            self.setpoints.get(&action.id).copied().unwrap_or(0.0)
        }

        fn country_of(&self, _network_element: &str) -> Option<Country> {
            None
        }

        fn country_boundaries(&self) -> Vec<(Country, Country)> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct HvdcEngine {
        fail: bool,
    }

    impl SensitivityEngine for HvdcEngine {
        fn compute(
            &self,
            network: &dyn Network,
            _perimeter: &OptimizationPerimeter,
        ) -> Result<SensitivityResult, SensitivityError> {
            if self.fail {
                return Err(SensitivityError::Divergence { message: "test".into() });
            }
            let network = network.as_any().downcast_ref::<HvdcNetwork>().ok_or(
                SensitivityError::ComputationFailed { message: "unexpected network".into() },
            )?;
            let setpoint = network.setpoints.get("hvdc").copied().unwrap_or(0.0);
            Ok(SensitivityResult::new()
                .with_flow("c1", 150.0 - setpoint)
                .with_sensitivity("c1", "hvdc", -1.0))
        }
    }

    struct FailingSolver;

    impl LinearSolver for FailingSolver {
        fn solve(&self, _problem: &LinearProblem) -> LinearSolution {
            LinearSolution::failed(LinearProblemStatus::Infeasible)
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn sample_perimeter() -> OptimizationPerimeter {
        OptimizationPerimeter::new()
            .with_cnec(Cnec::new("c1", "line-1").with_limit(100.0))
            .with_range_action(RangeAction::hvdc("hvdc", "HVDC", -100.0, 100.0))
    }

    fn run(engine: &HvdcEngine, solver: &dyn LinearSolver) -> (LinearOptimizationResult, HvdcNetwork) {
        let perimeter = sample_perimeter();
        let mut network = HvdcNetwork::default();
        let sensitivity = HvdcEngine { fail: false }.compute(&network, &perimeter).unwrap();
        let pre = PrePerimeterState::capture(&perimeter, &sensitivity, &network);
        let objective = ObjectiveFunction::new(ObjectiveParameters::default());
        let evaluation = objective.evaluate(&perimeter, &sensitivity, &pre);
        let activation = pre.activation(&perimeter.range_actions);
        let problem = LeafProblem::new(&ObjectiveParameters::default(), &LinearOptimizerParameters::default());
        let optimizer = IteratingLinearOptimizer::new(engine, solver, &objective, &problem, 5);
        let result = optimizer.optimize(
            &mut network,
            &LinearOptimizationInput {
                perimeter: &perimeter,
                range_actions: &perimeter.range_actions,
                pre_perimeter: &pre,
                activation: &activation,
                sensitivity: &sensitivity,
                evaluation: &evaluation,
            },
        );
        (result, network)
    }

    #[test]
    fn moves_hvdc_to_relieve_cnec() {
        let (result, network) = run(&HvdcEngine { fail: false }, &ClarabelSolver::new());
        assert_eq!(result.status, LinearProblemStatus::Optimal);
        assert_eq!(result.activation.setpoint("hvdc"), Some(100.0));
        // flow 50 -> margin 50
        assert!((result.evaluation.cost.functional + 50.0).abs() < 1e-9);
        assert_eq!(network.setpoints.get("hvdc"), Some(&100.0));
        assert!(result.iterations <= 2);
    }

    #[test]
    fn solver_failure_on_first_iteration_keeps_input() {
        let (result, _) = run(&HvdcEngine { fail: false }, &FailingSolver);
        assert_eq!(result.status, LinearProblemStatus::Infeasible);
        assert_eq!(result.activation.setpoint("hvdc"), Some(0.0));
        // flow 150 -> margin -50
        assert_eq!(result.evaluation.cost.functional, 50.0);
    }

    #[test]
    fn sensitivity_failure_is_reported() {
        let (result, network) = run(&HvdcEngine { fail: true }, &ClarabelSolver::new());
        assert_eq!(result.status, LinearProblemStatus::SensitivityComputationFailed);
        assert_eq!(result.activation.setpoint("hvdc"), Some(0.0));
        // the rejected setpoint is rolled back on the network
        assert_eq!(network.setpoints.get("hvdc"), Some(&0.0));
    }
}
