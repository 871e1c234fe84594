//! Configuration scoped to one search tree run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::errors::RaoResult;
use crate::validation_error;

/// When the search may stop before exhausting the depth budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopCriterion {
    /// Keep searching until the depth limit or a local optimum.
    MinObjective,
    /// Stop as soon as a leaf's cost falls below `target`.
    AtTargetObjectiveValue { target: f64 },
}

impl Default for StopCriterion {
    fn default() -> Self {
        Self::MinObjective
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    MaxMinMargin,
    MaxMinRelativeMargin,
}

impl Default for ObjectiveKind {
    fn default() -> Self {
        Self::MaxMinMargin
    }
}

/// Functional cost definition and soft-penalty weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveParameters {
    pub kind: ObjectiveKind,
    /// Floor applied to PTDF sums in relative-margin mode.
    pub ptdf_sum_lower_bound: f64,
    pub mnec_acceptable_margin_decrease: f64,
    pub mnec_violation_cost: f64,
    pub loop_flow_acceptable_augmentation: f64,
    pub loop_flow_violation_cost: f64,
    pub unoptimized_cnec_cost: f64,
    /// Operators whose CNECs only need to keep their pre-perimeter margin.
    pub operators_not_to_optimize: BTreeSet<String>,
}

impl Default for ObjectiveParameters {
    fn default() -> Self {
        Self {
            kind: ObjectiveKind::MaxMinMargin,
            ptdf_sum_lower_bound: 0.01,
            mnec_acceptable_margin_decrease: 50.0,
            mnec_violation_cost: 10.0,
            loop_flow_acceptable_augmentation: 0.0,
            loop_flow_violation_cost: 10.0,
            unoptimized_cnec_cost: 10.0,
            operators_not_to_optimize: BTreeSet::new(),
        }
    }
}

impl ObjectiveParameters {
    pub fn is_relative(&self) -> bool {
        self.kind == ObjectiveKind::MaxMinRelativeMargin
    }

    pub fn with_kind(mut self, kind: ObjectiveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_operator_not_to_optimize(mut self, operator: impl Into<String>) -> Self {
        self.operators_not_to_optimize.insert(operator.into());
        self
    }
}

/// Settings of the nested continuous optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOptimizerParameters {
    pub max_iterations: usize,
    /// Cost per degree of PST angle variation.
    pub pst_penalty_cost: f64,
    /// Cost per MW of HVDC setpoint variation.
    pub hvdc_penalty_cost: f64,
    /// Cost per MW of injection setpoint variation.
    pub injection_penalty_cost: f64,
}

impl Default for LinearOptimizerParameters {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            pst_penalty_cost: 0.01,
            hvdc_penalty_cost: 0.001,
            injection_penalty_cost: 0.001,
        }
    }
}

/// Per-operator and global caps on activated remedial actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaUsageLimits {
    /// Maximum number of remedial actions (discrete and continuous).
    pub max_ra: Option<usize>,
    /// Maximum number of distinct operators using remedial actions.
    pub max_tso: Option<usize>,
    pub max_topo_per_tso: HashMap<String, usize>,
    pub max_pst_per_tso: HashMap<String, usize>,
    pub max_ra_per_tso: HashMap<String, usize>,
    pub max_elementary_actions_per_tso: HashMap<String, usize>,
}

impl RaUsageLimits {
    pub fn with_max_ra(mut self, n: usize) -> Self {
        self.max_ra = Some(n);
        self
    }

    pub fn with_max_tso(mut self, n: usize) -> Self {
        self.max_tso = Some(n);
        self
    }

    pub fn with_max_topo_per_tso(mut self, tso: impl Into<String>, n: usize) -> Self {
        self.max_topo_per_tso.insert(tso.into(), n);
        self
    }

    pub fn with_max_pst_per_tso(mut self, tso: impl Into<String>, n: usize) -> Self {
        self.max_pst_per_tso.insert(tso.into(), n);
        self
    }

    pub fn with_max_ra_per_tso(mut self, tso: impl Into<String>, n: usize) -> Self {
        self.max_ra_per_tso.insert(tso.into(), n);
        self
    }

    pub fn with_max_elementary_actions_per_tso(mut self, tso: impl Into<String>, n: usize) -> Self {
        self.max_elementary_actions_per_tso.insert(tso.into(), n);
        self
    }
}

/// Immutable configuration for one search tree run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParameters {
    pub stop_criterion: StopCriterion,
    pub maximum_search_depth: usize,
    /// Number of same-depth leaves evaluated concurrently.
    pub leaves_in_parallel: usize,
    pub absolute_min_impact_threshold: f64,
    pub relative_min_impact_threshold: f64,
    /// When set, network actions further than this many country
    /// boundaries from the limiting elements are not tried.
    pub max_boundaries_for_skipping_network_actions: Option<usize>,
    pub usage_limits: RaUsageLimits,
    pub objective: ObjectiveParameters,
    pub linear_optimizer: LinearOptimizerParameters,
    /// Wall-clock ceiling on waiting for one depth's workers.
    pub depth_timeout_seconds: u64,
    /// Wall-clock ceiling on waiting for a free network copy.
    pub network_checkout_timeout_seconds: u64,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            stop_criterion: StopCriterion::MinObjective,
            maximum_search_depth: 2,
            leaves_in_parallel: 1,
            absolute_min_impact_threshold: 0.0,
            relative_min_impact_threshold: 0.0,
            max_boundaries_for_skipping_network_actions: None,
            usage_limits: RaUsageLimits::default(),
            objective: ObjectiveParameters::default(),
            linear_optimizer: LinearOptimizerParameters::default(),
            depth_timeout_seconds: 24 * 3600,
            network_checkout_timeout_seconds: 24 * 3600,
        }
    }
}

impl TreeParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> RaoResult<Self> {
        let parameters: Self = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn with_stop_criterion(mut self, criterion: StopCriterion) -> Self {
        self.stop_criterion = criterion;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.maximum_search_depth = depth;
        self
    }

    pub fn with_leaves_in_parallel(mut self, n: usize) -> Self {
        self.leaves_in_parallel = n;
        self
    }

    pub fn with_min_impact_thresholds(mut self, absolute: f64, relative: f64) -> Self {
        self.absolute_min_impact_threshold = absolute;
        self.relative_min_impact_threshold = relative;
        self
    }

    pub fn with_skip_far_network_actions(mut self, max_boundaries: usize) -> Self {
        self.max_boundaries_for_skipping_network_actions = Some(max_boundaries);
        self
    }

    pub fn with_usage_limits(mut self, limits: RaUsageLimits) -> Self {
        self.usage_limits = limits;
        self
    }

    pub fn with_objective(mut self, objective: ObjectiveParameters) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_linear_optimizer(mut self, linear: LinearOptimizerParameters) -> Self {
        self.linear_optimizer = linear;
        self
    }

    pub fn with_depth_timeout_seconds(mut self, seconds: u64) -> Self {
        self.depth_timeout_seconds = seconds;
        self
    }

    pub fn validate(&self) -> RaoResult<()> {
        if self.leaves_in_parallel == 0 {
            return Err(validation_error!("leaves_in_parallel must be at least 1"));
        }
        if self.absolute_min_impact_threshold.is_nan() || self.relative_min_impact_threshold.is_nan() {
            return Err(validation_error!("minimum impact thresholds must be numbers"));
        }
        if let StopCriterion::AtTargetObjectiveValue { target } = self.stop_criterion {
            if !target.is_finite() {
                return Err(validation_error!("target objective value must be finite, got {}", target));
            }
        }
        if self.linear_optimizer.max_iterations == 0 {
            return Err(validation_error!("linear optimizer needs at least one iteration"));
        }
        if self.depth_timeout_seconds == 0 || self.network_checkout_timeout_seconds == 0 {
            return Err(validation_error!("timeouts must be strictly positive"));
        }
        if self.objective.ptdf_sum_lower_bound <= 0.0 {
            return Err(validation_error!(
                "ptdf_sum_lower_bound must be positive, got {}",
                self.objective.ptdf_sum_lower_bound
            ));
        }
        Ok(())
    }
}
