//! Output of one sensitivity computation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Flows and sensitivity coefficients computed on one network state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitivityResult {
    /// Reference flow per CNEC id (MW).
    pub flows: HashMap<String, f64>,
    /// dFlow/dSetpoint, keyed by CNEC id then range action id.
    pub sensitivities: HashMap<String, HashMap<String, f64>>,
    /// Commercial flow per loop-flow CNEC id (MW).
    pub commercial_flows: HashMap<String, f64>,
    /// Sum of absolute zone-to-zone PTDFs per CNEC id.
    pub ptdf_sums: HashMap<String, f64>,
}

impl SensitivityResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, cnec_id: impl Into<String>, flow: f64) -> Self {
        self.flows.insert(cnec_id.into(), flow);
        self
    }

    pub fn with_sensitivity(mut self, cnec_id: impl Into<String>, range_action_id: impl Into<String>, value: f64) -> Self {
        self.sensitivities
            .entry(cnec_id.into())
            .or_default()
            .insert(range_action_id.into(), value);
        self
    }

    pub fn with_commercial_flow(mut self, cnec_id: impl Into<String>, flow: f64) -> Self {
        self.commercial_flows.insert(cnec_id.into(), flow);
        self
    }

    pub fn with_ptdf_sum(mut self, cnec_id: impl Into<String>, sum: f64) -> Self {
        self.ptdf_sums.insert(cnec_id.into(), sum);
        self
    }

    /// Flow of a CNEC; NaN values are treated as missing.
    pub fn flow(&self, cnec_id: &str) -> Option<f64> {
        self.flows.get(cnec_id).copied().filter(|f| !f.is_nan())
    }

    /// Sensitivity of a CNEC flow to a range action, zero when not computed.
    pub fn sensitivity(&self, cnec_id: &str, range_action_id: &str) -> f64 {
        self.sensitivities
            .get(cnec_id)
            .and_then(|row| row.get(range_action_id))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn commercial_flow(&self, cnec_id: &str) -> f64 {
        self.commercial_flows.get(cnec_id).copied().unwrap_or(0.0)
    }

    pub fn ptdf_sum(&self, cnec_id: &str) -> Option<f64> {
        self.ptdf_sums.get(cnec_id).copied()
    }

    pub fn loop_flow(&self, cnec_id: &str) -> Option<f64> {
        self.flow(cnec_id).map(|f| f - self.commercial_flow(cnec_id))
    }
}
