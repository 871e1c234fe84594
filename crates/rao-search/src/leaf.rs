//! Search tree node.
//!
//! A leaf fixes one combination of network actions on its own network copy
//! and moves through `Created -> Evaluated -> Optimized`, or to `Error` when
//! its network or sensitivity computation fails. Failures are recorded in
//! the state, never raised to the caller.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rao_linear::{
    apply_setpoints, IteratingLinearOptimizer, LinearOptimizationInput, LinearOptimizationResult,
    LinearProblemStatus, ObjectiveEvaluation,
};
use rao_types::{
    Cost, LimitingElement, NetworkAction, NetworkError, RangeActionActivation, SensitivityError,
    SensitivityResult,
};

use crate::bloomer::BloomInput;
use crate::combination::ActionCombination;
use crate::context::SearchContext;
use crate::filter::RangeActionFilter;
use crate::pool::PooledNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeafStatus {
    Created,
    Evaluated,
    Optimized,
    Error,
}

impl fmt::Display for LeafStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Evaluated => "EVALUATED",
            Self::Optimized => "OPTIMIZED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Evaluation {
    sensitivity: SensitivityResult,
    objective: ObjectiveEvaluation,
}

#[derive(Debug)]
enum LeafState {
    Created,
    Evaluated(Evaluation),
    Optimized {
        pre_optimization: Evaluation,
        result: LinearOptimizationResult,
    },
    Error(String),
}

impl LeafState {
    fn status(&self) -> LeafStatus {
        match self {
            Self::Created => LeafStatus::Created,
            Self::Evaluated(_) => LeafStatus::Evaluated,
            Self::Optimized { .. } => LeafStatus::Optimized,
            Self::Error(_) => LeafStatus::Error,
        }
    }
}

pub struct Leaf {
    combination: ActionCombination,
    network: Option<PooledNetwork>,
    /// Range action setpoints currently applied on the network copy.
    activation: RangeActionActivation,
    state: LeafState,
}

impl Leaf {
    /// Leaf without network actions, on a network already holding its
    /// pre-perimeter setpoints.
    pub fn root(network: PooledNetwork, activation: RangeActionActivation) -> Self {
        Self {
            combination: ActionCombination::root(),
            network: Some(network),
            activation,
            state: LeafState::Created,
        }
    }

    /// Applies the combination and the inherited range action setpoints on
    /// `network`. A failure leaves the leaf in `Error` with its network
    /// already released.
    pub fn new(
        network: PooledNetwork,
        combination: ActionCombination,
        activation: RangeActionActivation,
        ctx: &SearchContext,
    ) -> Self {
        let mut leaf = Self {
            combination,
            network: Some(network),
            activation,
            state: LeafState::Created,
        };
        if let Err(e) = leaf.prepare_network(ctx) {
            leaf.fail(e.to_string());
        }
        leaf
    }

    fn prepare_network(&mut self, ctx: &SearchContext) -> Result<(), NetworkError> {
        let Some(network) = self.network.as_mut() else {
            return Err(NetworkError::PoolClosed);
        };
        for id in self.combination.action_ids() {
            let action = ctx
                .perimeter
                .network_action(id)
                .ok_or_else(|| NetworkError::UnknownAction { action_id: id.to_string() })?;
            network.apply_network_action(action)?;
        }
        apply_setpoints(&mut **network, &ctx.perimeter.range_actions, &self.activation)
    }

    fn fail(&mut self, cause: String) {
        warn!(leaf = %self.combination, %cause, "leaf failed");
        self.state = LeafState::Error(cause);
        self.release_network();
    }

    /// Runs the sensitivity computation on the leaf's network and evaluates
    /// the cost. Only legal from `Created`.
    pub fn evaluate(&mut self, ctx: &SearchContext) {
        if !matches!(self.state, LeafState::Created) {
            warn!(leaf = %self.combination, status = %self.status(), "leaf already evaluated");
            return;
        }
        let result = match self.network.as_deref() {
            Some(network) => ctx.engine.compute(network, &ctx.perimeter),
            None => Err(SensitivityError::ComputationFailed {
                message: "leaf has no network".into(),
            }),
        };
        self.record_sensitivity(ctx, result);
    }

    /// Evaluates the cost from a sensitivity result computed elsewhere on
    /// this leaf's network.
    pub fn record_sensitivity(&mut self, ctx: &SearchContext, result: Result<SensitivityResult, SensitivityError>) {
        if !matches!(self.state, LeafState::Created) {
            warn!(leaf = %self.combination, status = %self.status(), "leaf already evaluated");
            return;
        }
        match result {
            Ok(sensitivity) => {
                let objective = ctx.objective.evaluate(&ctx.perimeter, &sensitivity, &ctx.pre_perimeter);
                debug!(
                    leaf = %self.combination,
                    cost = objective.cost.total(),
                    functional = objective.cost.functional,
                    "leaf evaluated"
                );
                self.state = LeafState::Evaluated(Evaluation { sensitivity, objective });
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Optimizes the range actions left after filtering. Only legal from
    /// `Evaluated`; always ends in `Optimized`, the solver outcome being
    /// kept in [`Leaf::solve_status`].
    pub fn optimize(&mut self, ctx: &SearchContext) {
        let evaluation = match std::mem::replace(&mut self.state, LeafState::Created) {
            LeafState::Evaluated(evaluation) => evaluation,
            other => {
                let status = other.status();
                self.state = other;
                warn!(leaf = %self.combination, %status, "cannot optimize a leaf that is not evaluated");
                return;
            }
        };

        let applied = self.applied_network_actions(ctx);
        let constrained = constrained_cnecs(&evaluation.objective);
        let mut filter = RangeActionFilter::new(
            &ctx.perimeter.range_actions,
            applied,
            &self.activation,
            &ctx.pre_perimeter,
            &evaluation.sensitivity,
            evaluation.objective.most_limiting_cnec(),
        );
        filter.filter_unavailable(&constrained);
        filter.apply_usage_limits(&ctx.parameters.usage_limits);
        let range_actions = filter.range_actions();

        let unchanged = |status| LinearOptimizationResult {
            status,
            activation: self.activation.clone(),
            sensitivity: evaluation.sensitivity.clone(),
            evaluation: evaluation.objective.clone(),
            iterations: 0,
        };
        let result = if range_actions.is_empty() {
            debug!(leaf = %self.combination, "no range action to optimize");
            unchanged(LinearProblemStatus::Optimal)
        } else if let Some(network) = self.network.as_mut() {
            let optimizer = IteratingLinearOptimizer::new(
                &*ctx.engine,
                &*ctx.solver,
                &ctx.objective,
                &ctx.problem,
                ctx.parameters.linear_optimizer.max_iterations,
            );
            optimizer.optimize(
                &mut **network,
                &LinearOptimizationInput {
                    perimeter: &ctx.perimeter,
                    range_actions: &range_actions,
                    pre_perimeter: &ctx.pre_perimeter,
                    activation: &self.activation,
                    sensitivity: &evaluation.sensitivity,
                    evaluation: &evaluation.objective,
                },
            )
        } else {
            warn!(leaf = %self.combination, "leaf network was released before optimization");
            unchanged(LinearProblemStatus::Abnormal)
        };

        debug!(
            leaf = %self.combination,
            range_actions = range_actions.len(),
            status = ?result.status,
            iterations = result.iterations,
            cost = result.evaluation.cost.total(),
            "leaf optimized"
        );
        self.activation = result.activation.clone();
        self.state = LeafState::Optimized {
            pre_optimization: evaluation,
            result,
        };
    }

    fn applied_network_actions<'a>(&self, ctx: &'a SearchContext) -> Vec<&'a NetworkAction> {
        self.combination
            .action_ids()
            .filter_map(|id| ctx.perimeter.network_action(id))
            .collect()
    }

    fn current_evaluation(&self) -> Option<&ObjectiveEvaluation> {
        match &self.state {
            LeafState::Evaluated(e) => Some(&e.objective),
            LeafState::Optimized { result, .. } => Some(&result.evaluation),
            LeafState::Created | LeafState::Error(_) => None,
        }
    }

    pub fn status(&self) -> LeafStatus {
        self.state.status()
    }

    pub fn combination(&self) -> &ActionCombination {
        &self.combination
    }

    /// Optimized cost once optimized, evaluated cost before.
    pub fn best_cost(&self) -> Option<&Cost> {
        self.current_evaluation().map(|e| &e.cost)
    }

    /// Cost before range action optimization.
    pub fn pre_optimization_cost(&self) -> Option<&Cost> {
        match &self.state {
            LeafState::Evaluated(e) | LeafState::Optimized { pre_optimization: e, .. } => Some(&e.objective.cost),
            LeafState::Created | LeafState::Error(_) => None,
        }
    }

    pub fn objective_evaluation(&self) -> Option<&ObjectiveEvaluation> {
        self.current_evaluation()
    }

    pub fn sensitivity(&self) -> Option<&SensitivityResult> {
        match &self.state {
            LeafState::Evaluated(e) => Some(&e.sensitivity),
            LeafState::Optimized { result, .. } => Some(&result.sensitivity),
            LeafState::Created | LeafState::Error(_) => None,
        }
    }

    pub fn range_activation(&self) -> &RangeActionActivation {
        &self.activation
    }

    pub fn most_limiting_elements(&self) -> &[LimitingElement] {
        self.current_evaluation()
            .map(|e| e.most_limiting_elements.as_slice())
            .unwrap_or(&[])
    }

    /// Outcome of the continuous optimization, once optimized.
    pub fn solve_status(&self) -> Option<LinearProblemStatus> {
        match &self.state {
            LeafState::Optimized { result, .. } => Some(result.status),
            _ => None,
        }
    }

    pub fn error_cause(&self) -> Option<&str> {
        match &self.state {
            LeafState::Error(cause) => Some(cause.as_str()),
            _ => None,
        }
    }

    pub fn has_network(&self) -> bool {
        self.network.is_some()
    }

    /// Hands the network copy back to its pool. Returns whether a copy was
    /// still held.
    pub fn release_network(&mut self) -> bool {
        self.network.take().is_some()
    }

    /// CNECs constraining the leaf: the most limiting one and every
    /// optimized CNEC with a negative margin.
    pub fn constrained_cnecs(&self) -> HashSet<String> {
        self.current_evaluation().map(constrained_cnecs).unwrap_or_default()
    }

    pub fn bloom_input(&self) -> Option<BloomInput<'_>> {
        let evaluation = self.current_evaluation()?;
        Some(BloomInput {
            combination: &self.combination,
            activation: &self.activation,
            most_limiting_cnec: evaluation.most_limiting_cnec(),
            costly_cnecs: evaluation.costly_cnecs().collect(),
            constrained_cnecs: constrained_cnecs(evaluation),
        })
    }
}

fn constrained_cnecs(evaluation: &ObjectiveEvaluation) -> HashSet<String> {
    evaluation
        .most_limiting_elements
        .iter()
        .enumerate()
        .filter(|(i, e)| *i == 0 || e.margin < 0.0)
        .map(|(_, e)| e.cnec_id.clone())
        .collect()
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.combination)?;
        match self.best_cost() {
            Some(cost) => write!(
                f,
                ", cost: {:.2} (functional: {:.2}, virtual: {:.2})",
                cost.total(),
                cost.functional,
                cost.virtual_total()
            ),
            None => write!(f, ", status: {}", self.status()),
        }
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("combination", &self.combination)
            .field("status", &self.status())
            .field("has_network", &self.has_network())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::NetworkPool;
    use crate::test_utils::{context, MockNetwork, MockSensitivityEngine, ScriptedSolver};
    use rao_types::{Cnec, OptimizationPerimeter, RangeAction, TreeParameters};
    use std::sync::Arc;
    use std::time::Duration;

    fn sample_perimeter() -> OptimizationPerimeter {
        OptimizationPerimeter::new()
            .with_cnec(Cnec::new("cnec-1", "line-1").with_limit(100.0))
            .with_network_action(NetworkAction::new("open-a").with_operator("FR"))
            .with_network_action(NetworkAction::new("open-b").with_operator("FR"))
            .with_range_action(RangeAction::hvdc("hvdc", "hvdc-line", -100.0, 100.0))
    }

    fn sample_engine() -> Arc<MockSensitivityEngine> {
        Arc::new(
            MockSensitivityEngine::new()
                .with_flow("cnec-1", 130.0)
                .with_effect("open-a", "cnec-1", -5.0)
                .with_sensitivity("cnec-1", "hvdc", -0.2)
                .diverging_on("open-b"),
        )
    }

    fn sample_context() -> (Arc<SearchContext>, Arc<NetworkPool>) {
        let network = MockNetwork::new();
        let ctx = context(sample_perimeter(), TreeParameters::default(), sample_engine(), &network);
        let pool = NetworkPool::new(&network, 2, Duration::from_secs(1));
        (ctx, pool)
    }

    fn child(ctx: &SearchContext, pool: &Arc<NetworkPool>, action: &str) -> Leaf {
        let combination = ActionCombination::root().extended_with(ctx.perimeter.network_action(action).unwrap());
        let activation = ctx.pre_perimeter.activation(&ctx.perimeter.range_actions);
        Leaf::new(pool.checkout().unwrap(), combination, activation, ctx)
    }

    #[test]
    fn evaluate_then_optimize() {
        let (ctx, pool) = sample_context();
        let mut leaf = child(&ctx, &pool, "open-a");
        assert_eq!(leaf.status(), LeafStatus::Created);
        assert!(leaf.best_cost().is_none());

        leaf.evaluate(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Evaluated);
        assert!((leaf.best_cost().unwrap().total() - 25.0).abs() < 1e-9);
        assert_eq!(leaf.constrained_cnecs(), HashSet::from(["cnec-1".to_string()]));

        leaf.optimize(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Optimized);
        assert_eq!(leaf.solve_status(), Some(LinearProblemStatus::Optimal));
        // hvdc pushed to 100: 125 - 20 = 105
        assert!((leaf.best_cost().unwrap().total() - 5.0).abs() < 1e-6);
        assert!((leaf.pre_optimization_cost().unwrap().total() - 25.0).abs() < 1e-9);
        assert_eq!(leaf.range_activation().setpoint("hvdc"), Some(100.0));
    }

    #[test]
    fn divergence_moves_to_error_and_releases_network() {
        let (ctx, pool) = sample_context();
        let mut leaf = child(&ctx, &pool, "open-b");
        assert_eq!(pool.in_use(), 1);

        leaf.evaluate(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Error);
        assert!(leaf.error_cause().unwrap().contains("diverged"));
        assert!(!leaf.has_network());
        assert_eq!(pool.in_use(), 0);
        assert!(!leaf.release_network());
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        let (ctx, pool) = sample_context();
        let mut leaf = child(&ctx, &pool, "open-a");
        leaf.optimize(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Created);

        leaf.evaluate(&ctx);
        leaf.evaluate(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Evaluated);

        leaf.optimize(&ctx);
        let cost = leaf.best_cost().cloned();
        leaf.optimize(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Optimized);
        assert_eq!(leaf.best_cost().cloned(), cost);

        let mut failed = child(&ctx, &pool, "open-b");
        failed.evaluate(&ctx);
        failed.optimize(&ctx);
        assert_eq!(failed.status(), LeafStatus::Error);
    }

    #[test]
    fn network_is_released_exactly_once() {
        let (ctx, pool) = sample_context();
        let mut leaf = child(&ctx, &pool, "open-a");
        leaf.evaluate(&ctx);
        assert_eq!(pool.in_use(), 1);
        assert!(leaf.release_network());
        assert!(!leaf.release_network());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn unknown_action_fails_at_creation() {
        let (ctx, pool) = sample_context();
        let combination = ActionCombination::root().extended_with(&NetworkAction::new("missing"));
        let leaf = Leaf::new(pool.checkout().unwrap(), combination, RangeActionActivation::new(), &ctx);
        assert_eq!(leaf.status(), LeafStatus::Error);
        assert!(!leaf.has_network());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn failed_solve_still_optimizes() {
        let network = MockNetwork::new();
        let engine = sample_engine();
        let ctx = context(sample_perimeter(), TreeParameters::default(), engine.clone(), &network);
        let ctx = SearchContext::new(
            ctx.perimeter.clone(),
            ctx.parameters.clone(),
            engine,
            Arc::new(ScriptedSolver {
                status: LinearProblemStatus::Infeasible,
            }),
            ctx.pre_perimeter.clone(),
        );
        let pool = NetworkPool::new(&network, 1, Duration::from_secs(1));
        let mut leaf = child(&ctx, &pool, "open-a");
        leaf.evaluate(&ctx);
        leaf.optimize(&ctx);
        assert_eq!(leaf.status(), LeafStatus::Optimized);
        assert_eq!(leaf.solve_status(), Some(LinearProblemStatus::Infeasible));
        assert!((leaf.best_cost().unwrap().total() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn inherited_setpoints_are_applied() {
        let (ctx, pool) = sample_context();
        let combination = ActionCombination::root().extended_with(ctx.perimeter.network_action("open-a").unwrap());
        let mut activation = RangeActionActivation::new();
        activation.set("hvdc", 50.0, None);
        let mut leaf = Leaf::new(pool.checkout().unwrap(), combination, activation, &ctx);
        leaf.evaluate(&ctx);
        // 130 - 5 - 0.2 * 50
        assert!((leaf.best_cost().unwrap().total() - 15.0).abs() < 1e-9);
        assert!(leaf.to_string().starts_with("open-a, cost: 15.00"));
    }
}
