//! Read-only state shared by every leaf of one search tree run.

use std::sync::Arc;

use rao_linear::{LeafProblem, LinearSolver, ObjectiveFunction};
use rao_types::{
    OptimizationPerimeter, PrePerimeterState, SensitivityEngine, StopCriterion, TreeParameters,
};

use crate::leaf::Leaf;

/// Costs closer than this are considered equal.
pub const COST_EPSILON: f64 = 1e-6;

pub struct SearchContext {
    pub perimeter: OptimizationPerimeter,
    pub parameters: TreeParameters,
    pub engine: Arc<dyn SensitivityEngine>,
    pub solver: Arc<dyn LinearSolver>,
    pub objective: ObjectiveFunction,
    pub problem: LeafProblem,
    pub pre_perimeter: PrePerimeterState,
    purely_virtual: bool,
}

impl SearchContext {
    pub fn new(
        perimeter: OptimizationPerimeter,
        parameters: TreeParameters,
        engine: Arc<dyn SensitivityEngine>,
        solver: Arc<dyn LinearSolver>,
        pre_perimeter: PrePerimeterState,
    ) -> Self {
        let objective = ObjectiveFunction::new(parameters.objective.clone());
        let problem = LeafProblem::new(&parameters.objective, &parameters.linear_optimizer);
        let purely_virtual = objective.has_no_optimized_cnec(&perimeter);
        Self {
            perimeter,
            parameters,
            engine,
            solver,
            objective,
            problem,
            pre_perimeter,
            purely_virtual,
        }
    }

    /// Whether no CNEC contributes to the functional cost, leaving only
    /// virtual costs to minimise.
    pub fn is_purely_virtual(&self) -> bool {
        self.purely_virtual
    }

    pub fn stop_criterion_reached(&self, leaf: &Leaf) -> bool {
        let Some(cost) = leaf.best_cost() else {
            return false;
        };
        if cost.virtual_total() > COST_EPSILON {
            return false;
        }
        if self.purely_virtual {
            return true;
        }
        match self.parameters.stop_criterion {
            StopCriterion::MinObjective => false,
            StopCriterion::AtTargetObjectiveValue { target } => cost.total() < target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combination::ActionCombination;
    use crate::pool::NetworkPool;
    use crate::test_utils::{context, MockNetwork, MockSensitivityEngine};
    use rao_types::{Cnec, NetworkAction, RangeActionActivation};
    use std::time::Duration;

    #[test]
    fn monitored_only_perimeter_stops_once_virtual_cost_is_gone() {
        let network = MockNetwork::new();
        let perimeter = OptimizationPerimeter::new()
            .with_cnec(Cnec::new("mnec-1", "line-1").with_limit(100.0).monitored_only())
            .with_network_action(NetworkAction::new("overload"))
            .with_network_action(NetworkAction::new("relieve"));
        // initial margin 40, the MNEC may fall to a margin of -10
        let engine = Arc::new(
            MockSensitivityEngine::new()
                .with_flow("mnec-1", 60.0)
                .with_effect("overload", "mnec-1", 60.0)
                .with_effect("relieve", "mnec-1", -20.0),
        );
        let ctx = context(perimeter, TreeParameters::default(), engine, &network);
        assert!(ctx.is_purely_virtual());

        let pool = NetworkPool::new(&network, 1, Duration::from_secs(1));
        let evaluated = |action: &str| {
            let combination = ActionCombination::root().extended_with(ctx.perimeter.network_action(action).unwrap());
            let mut leaf = Leaf::new(pool.checkout().unwrap(), combination, RangeActionActivation::new(), &ctx);
            leaf.evaluate(&ctx);
            leaf.release_network();
            leaf
        };

        // margin -20 against -10 allowed, at 10 per MW
        let overloaded = evaluated("overload");
        assert!((overloaded.best_cost().unwrap().virtual_total() - 100.0).abs() < 1e-9);
        assert!(!ctx.stop_criterion_reached(&overloaded));
        assert!(ctx.stop_criterion_reached(&evaluated("relieve")));
    }

    #[test]
    fn target_applies_when_cnecs_are_optimized() {
        let network = MockNetwork::new();
        let perimeter = OptimizationPerimeter::new()
            .with_cnec(Cnec::new("cnec-1", "line-1").with_limit(100.0))
            .with_network_action(NetworkAction::new("a"));
        let engine = Arc::new(MockSensitivityEngine::new().with_flow("cnec-1", 60.0));
        let pool = NetworkPool::new(&network, 1, Duration::from_secs(1));

        let min_objective = context(perimeter.clone(), TreeParameters::default(), engine.clone(), &network);
        assert!(!min_objective.is_purely_virtual());
        let mut root = Leaf::root(pool.checkout().unwrap(), RangeActionActivation::new());
        root.evaluate(&min_objective);
        root.release_network();
        // cost -40
        assert!(!min_objective.stop_criterion_reached(&root));

        let parameters =
            TreeParameters::default().with_stop_criterion(StopCriterion::AtTargetObjectiveValue { target: -30.0 });
        let at_target = context(perimeter, parameters, engine, &network);
        assert!(at_target.stop_criterion_reached(&root));
    }
}
