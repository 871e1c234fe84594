//! Costs, setpoints and baseline values shared by the optimizer crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crac::{OptimizationPerimeter, RangeAction};
use crate::network::Network;
use crate::sensitivity::SensitivityResult;

/// Setpoints closer than this are considered identical.
pub const SETPOINT_EPSILON: f64 = 1e-6;

/// Functional cost plus named soft-penalty (virtual) costs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub functional: f64,
    pub virtual_costs: BTreeMap<String, f64>,
}

impl Cost {
    pub fn new(functional: f64) -> Self {
        Self {
            functional,
            virtual_costs: BTreeMap::new(),
        }
    }

    pub fn with_virtual(mut self, name: impl Into<String>, cost: f64) -> Self {
        self.virtual_costs.insert(name.into(), cost);
        self
    }

    pub fn virtual_cost(&self, name: &str) -> f64 {
        self.virtual_costs.get(name).copied().unwrap_or(0.0)
    }

    pub fn virtual_total(&self) -> f64 {
        self.virtual_costs.values().fold(0.0, |acc, c| acc + c)
    }

    pub fn total(&self) -> f64 {
        self.functional + self.virtual_total()
    }
}

/// A CNEC and its margin, as reported for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitingElement {
    pub cnec_id: String,
    pub margin: f64,
}

/// Setpoint of every range action, with the tap for PSTs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeActionActivation {
    pub setpoints: BTreeMap<String, f64>,
    pub taps: BTreeMap<String, i32>,
}

impl RangeActionActivation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, range_action_id: impl Into<String>, setpoint: f64, tap: Option<i32>) {
        let id = range_action_id.into();
        match tap {
            Some(tap) => {
                self.taps.insert(id.clone(), tap);
            }
            None => {
                self.taps.remove(&id);
            }
        }
        self.setpoints.insert(id, setpoint);
    }

    pub fn setpoint(&self, range_action_id: &str) -> Option<f64> {
        self.setpoints.get(range_action_id).copied()
    }

    pub fn tap(&self, range_action_id: &str) -> Option<i32> {
        self.taps.get(range_action_id).copied()
    }

    /// Overlays `other` on top of this activation.
    pub fn merged_with(&self, other: &RangeActionActivation) -> RangeActionActivation {
        let mut merged = self.clone();
        for (id, setpoint) in &other.setpoints {
            merged.set(id.clone(), *setpoint, other.tap(id));
        }
        merged
    }

    /// Whether both activations agree on every setpoint of `other`.
    pub fn agrees_with(&self, other: &RangeActionActivation) -> bool {
        other.setpoints.iter().all(|(id, setpoint)| {
            self.setpoint(id)
                .is_some_and(|s| (s - setpoint).abs() < SETPOINT_EPSILON)
        })
    }

    /// A range action is used when it moved away from its pre-perimeter setpoint.
    pub fn is_used(&self, range_action_id: &str, pre_perimeter: &PrePerimeterState) -> bool {
        match (self.setpoint(range_action_id), pre_perimeter.setpoint(range_action_id)) {
            (Some(current), Some(initial)) => (current - initial).abs() >= SETPOINT_EPSILON,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Flows and setpoints observed before any remedial action of this perimeter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrePerimeterState {
    pub flows: BTreeMap<String, f64>,
    pub commercial_flows: BTreeMap<String, f64>,
    pub setpoints: BTreeMap<String, f64>,
}

impl PrePerimeterState {
    pub fn capture(
        perimeter: &OptimizationPerimeter,
        sensitivity: &SensitivityResult,
        network: &dyn Network,
    ) -> Self {
        let flows = perimeter
            .cnecs
            .iter()
            .filter_map(|c| sensitivity.flow(&c.id).map(|f| (c.id.clone(), f)))
            .collect();
        let commercial_flows = perimeter
            .loop_flow_cnecs()
            .map(|c| (c.id.clone(), sensitivity.commercial_flow(&c.id)))
            .collect();
        let setpoints = perimeter
            .range_actions
            .iter()
            .map(|ra| (ra.id.clone(), network.range_action_setpoint(ra)))
            .collect();
        Self {
            flows,
            commercial_flows,
            setpoints,
        }
    }

    pub fn flow(&self, cnec_id: &str) -> Option<f64> {
        self.flows.get(cnec_id).copied()
    }

    pub fn loop_flow(&self, cnec_id: &str) -> Option<f64> {
        self.flow(cnec_id)
            .map(|f| f - self.commercial_flows.get(cnec_id).copied().unwrap_or(0.0))
    }

    pub fn setpoint(&self, range_action_id: &str) -> Option<f64> {
        self.setpoints.get(range_action_id).copied()
    }

    /// Activation with every range action at its pre-perimeter setpoint.
    pub fn activation(&self, range_actions: &[RangeAction]) -> RangeActionActivation {
        let mut activation = RangeActionActivation::new();
        for ra in range_actions {
            if let Some(setpoint) = self.setpoint(&ra.id) {
                activation.set(ra.id.clone(), setpoint, ra.nearest_tap(setpoint).map(|t| t.tap));
            }
        }
        activation
    }
}
