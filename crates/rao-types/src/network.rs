//! Collaborator traits for the physical network model and the sensitivity engine.

use std::any::Any;

use crate::crac::{NetworkAction, OptimizationPerimeter, RangeAction};
use crate::errors::{NetworkError, SensitivityError};
use crate::sensitivity::SensitivityResult;

/// Country code attached to a network location.
pub type Country = String;

/// Mutable physical-grid state.
///
/// Implementations must make `apply_network_action` idempotent and
/// `clone_boxed` must yield a fully independent copy.
pub trait Network: Send + Sync {
    fn clone_boxed(&self) -> Box<dyn Network>;

    fn apply_network_action(&mut self, action: &NetworkAction) -> Result<(), NetworkError>;

    fn apply_range_action(&mut self, action: &RangeAction, setpoint: f64) -> Result<(), NetworkError>;

    /// Current setpoint of a range action on this network state.
    fn range_action_setpoint(&self, action: &RangeAction) -> f64;

    /// Country of a network element, `None` when it cannot be resolved.
    fn country_of(&self, network_element: &str) -> Option<Country>;

    /// Pairs of countries sharing a border on this network.
    fn country_boundaries(&self) -> Vec<(Country, Country)>;

    /// Concrete access for engines bound to a specific network implementation.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Network> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Computes flows and sensitivities of the perimeter's CNECs on a network state.
pub trait SensitivityEngine: Send + Sync {
    fn compute(
        &self,
        network: &dyn Network,
        perimeter: &OptimizationPerimeter,
    ) -> Result<SensitivityResult, SensitivityError>;

    fn name(&self) -> &str {
        "sensitivity-engine"
    }
}
