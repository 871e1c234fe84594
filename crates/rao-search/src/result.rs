//! Outcome of one search tree run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rao_linear::LinearProblemStatus;
use rao_types::{Cost, LimitingElement, RangeActionActivation, RaoResult};

use crate::leaf::Leaf;

/// Lifecycle state of a search tree run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Best leaf found by a run, plus run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTreeResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub cost: Option<Cost>,
    pub activated_network_actions: Vec<String>,
    pub range_activation: RangeActionActivation,
    pub most_limiting_elements: Vec<LimitingElement>,
    pub solve_status: Option<LinearProblemStatus>,
    pub stop_criterion_reached: bool,
    /// Number of network actions of the best leaf.
    pub depth_reached: usize,
    pub leaves_evaluated: usize,
    pub leaves_failed: usize,
    /// Leaves abandoned when a depth ran past its deadline.
    pub leaves_timed_out: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchTreeResult {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            cost: None,
            activated_network_actions: Vec::new(),
            range_activation: RangeActionActivation::new(),
            most_limiting_elements: Vec::new(),
            solve_status: None,
            stop_criterion_reached: false,
            depth_reached: 0,
            leaves_evaluated: 0,
            leaves_failed: 0,
            leaves_timed_out: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, best: &Leaf, stop_criterion_reached: bool) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.cost = best.best_cost().cloned();
        self.activated_network_actions = best.combination().action_ids().map(str::to_string).collect();
        self.range_activation = best.range_activation().clone();
        self.most_limiting_elements = best.most_limiting_elements().to_vec();
        self.solve_status = best.solve_status();
        self.stop_criterion_reached = stop_criterion_reached;
        self.depth_reached = best.combination().len();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn to_json(&self) -> RaoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for SearchTreeResult {
    fn default() -> Self {
        Self::new()
    }
}
