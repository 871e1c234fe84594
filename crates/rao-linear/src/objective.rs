//! Cost evaluation of a network state from its flows.

use std::collections::BTreeMap;

use rao_types::{
    Cnec, Cost, LimitingElement, ObjectiveParameters, OptimizationPerimeter, PrePerimeterState,
    SensitivityResult,
};
use serde::{Deserialize, Serialize};

use crate::fillers::{loop_flow_limit, mnec_allowed_margin};

pub const MNEC_COST: &str = "mnec-cost";
pub const LOOP_FLOW_COST: &str = "loop-flow-cost";
pub const UNOPTIMIZED_CNEC_COST: &str = "unoptimized-cnec-cost";

/// Cost of one network state with its diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveEvaluation {
    pub cost: Cost,
    /// Optimized CNECs sorted by increasing margin.
    pub most_limiting_elements: Vec<LimitingElement>,
    /// CNECs with a non-zero contribution, per virtual cost name.
    pub costly_elements: BTreeMap<String, Vec<String>>,
}

impl ObjectiveEvaluation {
    pub fn most_limiting_cnec(&self) -> Option<&str> {
        self.most_limiting_elements.first().map(|e| e.cnec_id.as_str())
    }

    /// Every CNEC carrying a non-zero virtual cost.
    pub fn costly_cnecs(&self) -> impl Iterator<Item = &str> {
        self.costly_elements.values().flatten().map(String::as_str)
    }
}

/// Functional cost = −(worst margin); virtual costs from the soft penalties.
#[derive(Debug, Clone)]
pub struct ObjectiveFunction {
    parameters: ObjectiveParameters,
}

impl ObjectiveFunction {
    pub fn new(parameters: ObjectiveParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &ObjectiveParameters {
        &self.parameters
    }

    fn is_optimized(&self, cnec: &Cnec) -> bool {
        cnec.optimized
            && !cnec
                .operator
                .as_ref()
                .is_some_and(|op| self.parameters.operators_not_to_optimize.contains(op))
    }

    fn weighted_margin(&self, cnec: &Cnec, margin: f64, sensitivity: &SensitivityResult) -> f64 {
        if self.parameters.is_relative() && margin > 0.0 {
            let ptdf = sensitivity
                .ptdf_sum(&cnec.id)
                .unwrap_or(1.0)
                .max(self.parameters.ptdf_sum_lower_bound);
            margin / ptdf
        } else {
            margin
        }
    }

    /// Whether no CNEC can contribute to the functional cost.
    pub fn has_no_optimized_cnec(&self, perimeter: &OptimizationPerimeter) -> bool {
        !perimeter.cnecs.iter().any(|c| self.is_optimized(c))
    }

    pub fn evaluate(
        &self,
        perimeter: &OptimizationPerimeter,
        sensitivity: &SensitivityResult,
        pre_perimeter: &PrePerimeterState,
    ) -> ObjectiveEvaluation {
        let mut limiting: Vec<LimitingElement> = perimeter
            .cnecs
            .iter()
            .filter(|c| self.is_optimized(c))
            .filter_map(|c| {
                let margin = c.margin(sensitivity.flow(&c.id)?);
                margin.is_finite().then(|| LimitingElement {
                    cnec_id: c.id.clone(),
                    margin: self.weighted_margin(c, margin, sensitivity),
                })
            })
            .collect();
        limiting.sort_by(|a, b| a.margin.total_cmp(&b.margin).then_with(|| a.cnec_id.cmp(&b.cnec_id)));

        let functional = limiting.first().map_or(0.0, |e| -e.margin);
        let mut cost = Cost::new(functional);
        let mut costly_elements = BTreeMap::new();

        let mut add_virtual = |name: &str, contributions: Vec<(String, f64)>| {
            let total = contributions.iter().fold(0.0, |acc, (_, c)| acc + c);
            cost.virtual_costs.insert(name.to_string(), total);
            let ids: Vec<String> = contributions
                .into_iter()
                .filter(|(_, c)| *c > 0.0)
                .map(|(id, _)| id)
                .collect();
            if !ids.is_empty() {
                costly_elements.insert(name.to_string(), ids);
            }
        };

        add_virtual(MNEC_COST, self.mnec_violations(perimeter, sensitivity, pre_perimeter));
        add_virtual(LOOP_FLOW_COST, self.loop_flow_violations(perimeter, sensitivity, pre_perimeter));
        add_virtual(
            UNOPTIMIZED_CNEC_COST,
            self.unoptimized_violations(perimeter, sensitivity, pre_perimeter),
        );

        ObjectiveEvaluation {
            cost,
            most_limiting_elements: limiting,
            costly_elements,
        }
    }

    fn mnec_violations(
        &self,
        perimeter: &OptimizationPerimeter,
        sensitivity: &SensitivityResult,
        pre_perimeter: &PrePerimeterState,
    ) -> Vec<(String, f64)> {
        perimeter
            .monitored_cnecs()
            .filter_map(|c| {
                let flow = sensitivity.flow(&c.id)?;
                let allowed = mnec_allowed_margin(
                    c,
                    pre_perimeter.flow(&c.id)?,
                    self.parameters.mnec_acceptable_margin_decrease,
                );
                let deficit = (allowed - c.margin(flow)).max(0.0);
                Some((c.id.clone(), deficit * self.parameters.mnec_violation_cost))
            })
            .collect()
    }

    fn loop_flow_violations(
        &self,
        perimeter: &OptimizationPerimeter,
        sensitivity: &SensitivityResult,
        pre_perimeter: &PrePerimeterState,
    ) -> Vec<(String, f64)> {
        perimeter
            .loop_flow_cnecs()
            .filter_map(|c| {
                let loop_flow = sensitivity.loop_flow(&c.id)?;
                let limit = loop_flow_limit(
                    c.loop_flow_threshold?,
                    pre_perimeter.loop_flow(&c.id),
                    self.parameters.loop_flow_acceptable_augmentation,
                );
                let excess = (loop_flow.abs() - limit).max(0.0);
                Some((c.id.clone(), excess * self.parameters.loop_flow_violation_cost))
            })
            .collect()
    }

    fn unoptimized_violations(
        &self,
        perimeter: &OptimizationPerimeter,
        sensitivity: &SensitivityResult,
        pre_perimeter: &PrePerimeterState,
    ) -> Vec<(String, f64)> {
        let not_optimized = &self.parameters.operators_not_to_optimize;
        perimeter
            .optimized_cnecs()
            .filter(|c| c.operator.as_ref().is_some_and(|op| not_optimized.contains(op)))
            .filter_map(|c| {
                let initial = c.margin(pre_perimeter.flow(&c.id)?);
                let current = c.margin(sensitivity.flow(&c.id)?);
                if !initial.is_finite() {
                    return None;
                }
                let decrease = (initial - current).max(0.0);
                Some((c.id.clone(), decrease * self.parameters.unoptimized_cnec_cost))
            })
            .collect()
    }
}
