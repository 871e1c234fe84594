//! In-memory collaborators for search tree tests.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rao_linear::{ClarabelSolver, LinearProblem, LinearProblemStatus, LinearSolution, LinearSolver};
use rao_types::{
    Country, Network, NetworkAction, NetworkError, OptimizationPerimeter, PrePerimeterState,
    RangeAction, SensitivityEngine, SensitivityError, SensitivityResult, TreeParameters,
};

use crate::context::SearchContext;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Network that records applied actions and setpoints.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    applied: BTreeSet<String>,
    setpoints: HashMap<String, f64>,
    countries: HashMap<String, Country>,
    boundaries: Vec<(Country, Country)>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_country(mut self, network_element: &str, country: &str) -> Self {
        self.countries.insert(network_element.to_string(), country.to_string());
        self
    }

    pub fn with_boundary(mut self, a: &str, b: &str) -> Self {
        self.boundaries.push((a.to_string(), b.to_string()));
        self
    }

    pub fn applied_actions(&self) -> Vec<String> {
        self.applied.iter().cloned().collect()
    }

    pub fn setpoint(&self, range_action_id: &str) -> f64 {
        self.setpoints.get(range_action_id).copied().unwrap_or(0.0)
    }
}

impl Network for MockNetwork {
    fn clone_boxed(&self) -> Box<dyn Network> {
        Box::new(self.clone())
    }

    fn apply_network_action(&mut self, action: &NetworkAction) -> Result<(), NetworkError> {
        self.applied.insert(action.id.clone());
        Ok(())
    }

    fn apply_range_action(&mut self, action: &RangeAction, setpoint: f64) -> Result<(), NetworkError> {
        self.setpoints.insert(action.id.clone(), setpoint);
        Ok(())
    }

    fn range_action_setpoint(&self, action: &RangeAction) -> f64 {
        self.setpoint(&action.id)
    }

    fn country_of(&self, network_element: &str) -> Option<Country> {
        self.countries.get(network_element).cloned()
    }

    fn country_boundaries(&self) -> Vec<(Country, Country)> {
        self.boundaries.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Linear flow model: base flow, plus a delta per applied network action,
/// plus sensitivity × setpoint for every range action.
#[derive(Debug, Default)]
pub struct MockSensitivityEngine {
    base_flows: HashMap<String, f64>,
    action_effects: HashMap<String, HashMap<String, f64>>,
    sensitivities: HashMap<String, HashMap<String, f64>>,
    diverging_actions: HashSet<String>,
    panicking_actions: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSensitivityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, cnec_id: &str, flow: f64) -> Self {
        self.base_flows.insert(cnec_id.to_string(), flow);
        self
    }

    pub fn with_effect(mut self, action_id: &str, cnec_id: &str, delta: f64) -> Self {
        self.action_effects
            .entry(action_id.to_string())
            .or_default()
            .insert(cnec_id.to_string(), delta);
        self
    }

    pub fn with_sensitivity(mut self, cnec_id: &str, range_action_id: &str, value: f64) -> Self {
        self.sensitivities
            .entry(cnec_id.to_string())
            .or_default()
            .insert(range_action_id.to_string(), value);
        self
    }

    pub fn diverging_on(mut self, action_id: &str) -> Self {
        self.diverging_actions.insert(action_id.to_string());
        self
    }

    pub fn panicking_on(mut self, action_id: &str) -> Self {
        self.panicking_actions.insert(action_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SensitivityEngine for MockSensitivityEngine {
    fn compute(
        &self,
        network: &dyn Network,
        _perimeter: &OptimizationPerimeter,
    ) -> Result<SensitivityResult, SensitivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let network = network
            .as_any()
            .downcast_ref::<MockNetwork>()
            .ok_or_else(|| SensitivityError::ComputationFailed {
                message: "unsupported network".into(),
            })?;
        let applied = network.applied_actions();
        if let Some(action) = applied.iter().find(|a| self.panicking_actions.contains(*a)) {
            panic!("engine crashed on {action}");
        }
        if let Some(action) = applied.iter().find(|a| self.diverging_actions.contains(*a)) {
            return Err(SensitivityError::Divergence {
                message: format!("load flow diverged with {action}"),
            });
        }

        let mut result = SensitivityResult::new();
        for (cnec, base) in &self.base_flows {
            let mut flow = *base;
            for action in &applied {
                flow += self
                    .action_effects
                    .get(action)
                    .and_then(|effects| effects.get(cnec))
                    .copied()
                    .unwrap_or(0.0);
            }
            if let Some(row) = self.sensitivities.get(cnec) {
                for (ra, s) in row {
                    flow += s * network.setpoint(ra);
                    result = result.with_sensitivity(cnec.clone(), ra.clone(), *s);
                }
            }
            result = result.with_flow(cnec.clone(), flow);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Solver returning the same status for every problem.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedSolver {
    pub status: LinearProblemStatus,
}

impl LinearSolver for ScriptedSolver {
    fn solve(&self, _problem: &LinearProblem) -> LinearSolution {
        LinearSolution::failed(self.status)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Context whose pre-perimeter state is computed on `network`.
pub fn context(
    perimeter: OptimizationPerimeter,
    parameters: TreeParameters,
    engine: Arc<MockSensitivityEngine>,
    network: &MockNetwork,
) -> Arc<SearchContext> {
    let sensitivity = engine
        .compute(network, &perimeter)
        .expect("pre-perimeter sensitivity");
    let pre_perimeter = PrePerimeterState::capture(&perimeter, &sensitivity, network);
    Arc::new(SearchContext::new(
        perimeter,
        parameters,
        engine,
        Arc::new(ClarabelSolver::new()),
        pre_perimeter,
    ))
}
