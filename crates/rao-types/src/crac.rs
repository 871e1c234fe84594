//! Remedial actions and monitored elements available to one optimization perimeter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A monitored network element under a given contingency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cnec {
    pub id: String,
    pub network_element: String,
    pub operator: Option<String>,
    pub contingency: Option<String>,
    /// Minimum admissible flow (MW).
    pub lower_threshold: Option<f64>,
    /// Maximum admissible flow (MW).
    pub upper_threshold: Option<f64>,
    /// Whether the margin of this element enters the functional cost.
    pub optimized: bool,
    /// Whether this element must not be degraded beyond its initial margin.
    pub monitored: bool,
    /// Loop-flow limit (MW), when this element is subject to loop-flow control.
    pub loop_flow_threshold: Option<f64>,
}

impl Cnec {
    pub fn new(id: impl Into<String>, network_element: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_element: network_element.into(),
            operator: None,
            contingency: None,
            lower_threshold: None,
            upper_threshold: None,
            optimized: true,
            monitored: false,
            loop_flow_threshold: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_contingency(mut self, contingency: impl Into<String>) -> Self {
        self.contingency = Some(contingency.into());
        self
    }

    /// Symmetric thresholds `[-limit, limit]`.
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.lower_threshold = Some(-limit);
        self.upper_threshold = Some(limit);
        self
    }

    pub fn with_thresholds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_threshold = lower;
        self.upper_threshold = upper;
        self
    }

    /// Turns this element into a monitored-only element (MNEC).
    pub fn monitored_only(mut self) -> Self {
        self.optimized = false;
        self.monitored = true;
        self
    }

    pub fn with_loop_flow_threshold(mut self, threshold: f64) -> Self {
        self.loop_flow_threshold = Some(threshold);
        self
    }

    /// Distance between `flow` and the closest threshold; negative when violated.
    pub fn margin(&self, flow: f64) -> f64 {
        let upper = self.upper_threshold.map_or(f64::INFINITY, |u| u - flow);
        let lower = self.lower_threshold.map_or(f64::INFINITY, |l| flow - l);
        upper.min(lower)
    }
}

/// Condition under which a remedial action may be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsageRule {
    Available,
    /// Usable only while the given CNEC is constrained.
    OnConstraint { cnec_id: String },
    Unavailable,
}

impl Default for UsageRule {
    fn default() -> Self {
        Self::Available
    }
}

impl UsageRule {
    pub fn is_available(&self, constrained_cnecs: &HashSet<String>) -> bool {
        match self {
            Self::Available => true,
            Self::OnConstraint { cnec_id } => constrained_cnecs.contains(cnec_id),
            Self::Unavailable => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementaryActionKind {
    Topology { open: bool },
    Setpoint { value: f64 },
}

/// One switch operation or fixed setpoint inside a network action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementaryAction {
    pub network_element: String,
    pub kind: ElementaryActionKind,
}

impl ElementaryAction {
    pub fn open(network_element: impl Into<String>) -> Self {
        Self {
            network_element: network_element.into(),
            kind: ElementaryActionKind::Topology { open: true },
        }
    }

    pub fn close(network_element: impl Into<String>) -> Self {
        Self {
            network_element: network_element.into(),
            kind: ElementaryActionKind::Topology { open: false },
        }
    }

    pub fn setpoint(network_element: impl Into<String>, value: f64) -> Self {
        Self {
            network_element: network_element.into(),
            kind: ElementaryActionKind::Setpoint { value },
        }
    }
}

/// A discrete remedial action: either applied or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAction {
    pub id: String,
    pub operator: Option<String>,
    pub elementary_actions: Vec<ElementaryAction>,
    #[serde(default)]
    pub usage_rule: UsageRule,
}

impl NetworkAction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operator: None,
            elementary_actions: Vec::new(),
            usage_rule: UsageRule::Available,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_elementary_action(mut self, action: ElementaryAction) -> Self {
        self.elementary_actions.push(action);
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rule = rule;
        self
    }

    pub fn network_elements(&self) -> impl Iterator<Item = &str> {
        self.elementary_actions.iter().map(|a| a.network_element.as_str())
    }
}

/// One admissible position of a phase-shifting transformer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PstTap {
    pub tap: i32,
    /// Phase shift angle (degrees) at this tap.
    pub angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeActionKind {
    Pst { taps: Vec<PstTap> },
    Hvdc,
    Injection,
}

/// A continuous remedial action optimized within `[min_setpoint, max_setpoint]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeAction {
    pub id: String,
    pub operator: Option<String>,
    pub network_element: String,
    /// Actions sharing a group id are aligned and always move together.
    pub group_id: Option<String>,
    pub kind: RangeActionKind,
    pub min_setpoint: f64,
    pub max_setpoint: f64,
    #[serde(default)]
    pub usage_rule: UsageRule,
}

impl RangeAction {
    pub fn hvdc(id: impl Into<String>, network_element: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            id: id.into(),
            operator: None,
            network_element: network_element.into(),
            group_id: None,
            kind: RangeActionKind::Hvdc,
            min_setpoint: min,
            max_setpoint: max,
            usage_rule: UsageRule::Available,
        }
    }

    pub fn injection(id: impl Into<String>, network_element: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            kind: RangeActionKind::Injection,
            ..Self::hvdc(id, network_element, min, max)
        }
    }

    /// A PST whose setpoint range spans the angles of its taps.
    pub fn pst(id: impl Into<String>, network_element: impl Into<String>, taps: Vec<PstTap>) -> Self {
        let min = taps.iter().map(|t| t.angle).fold(f64::INFINITY, f64::min);
        let max = taps.iter().map(|t| t.angle).fold(f64::NEG_INFINITY, f64::max);
        let (min, max) = if taps.is_empty() { (0.0, 0.0) } else { (min, max) };
        Self {
            kind: RangeActionKind::Pst { taps },
            ..Self::hvdc(id, network_element, min, max)
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rule = rule;
        self
    }

    pub fn is_pst(&self) -> bool {
        matches!(self.kind, RangeActionKind::Pst { .. })
    }

    pub fn clamp(&self, setpoint: f64) -> f64 {
        setpoint.clamp(self.min_setpoint, self.max_setpoint)
    }

    /// Closest admissible tap for a PST; `None` for other kinds.
    pub fn nearest_tap(&self, setpoint: f64) -> Option<PstTap> {
        match &self.kind {
            RangeActionKind::Pst { taps } => taps.iter().copied().min_by(|a, b| {
                (a.angle - setpoint)
                    .abs()
                    .total_cmp(&(b.angle - setpoint).abs())
                    .then(a.tap.cmp(&b.tap))
            }),
            _ => None,
        }
    }
}

/// Everything the search tree may act on or must watch for one state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPerimeter {
    pub cnecs: Vec<Cnec>,
    pub network_actions: Vec<NetworkAction>,
    pub range_actions: Vec<RangeAction>,
}

impl OptimizationPerimeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cnec(mut self, cnec: Cnec) -> Self {
        self.cnecs.push(cnec);
        self
    }

    pub fn with_network_action(mut self, action: NetworkAction) -> Self {
        self.network_actions.push(action);
        self
    }

    pub fn with_range_action(mut self, action: RangeAction) -> Self {
        self.range_actions.push(action);
        self
    }

    pub fn cnec(&self, id: &str) -> Option<&Cnec> {
        self.cnecs.iter().find(|c| c.id == id)
    }

    pub fn network_action(&self, id: &str) -> Option<&NetworkAction> {
        self.network_actions.iter().find(|a| a.id == id)
    }

    pub fn range_action(&self, id: &str) -> Option<&RangeAction> {
        self.range_actions.iter().find(|a| a.id == id)
    }

    pub fn optimized_cnecs(&self) -> impl Iterator<Item = &Cnec> {
        self.cnecs.iter().filter(|c| c.optimized)
    }

    pub fn monitored_cnecs(&self) -> impl Iterator<Item = &Cnec> {
        self.cnecs.iter().filter(|c| c.monitored)
    }

    pub fn loop_flow_cnecs(&self) -> impl Iterator<Item = &Cnec> {
        self.cnecs.iter().filter(|c| c.loop_flow_threshold.is_some())
    }

    /// Operators owning at least one CNEC or remedial action.
    pub fn operators(&self) -> BTreeSet<&str> {
        self.cnecs
            .iter()
            .filter_map(|c| c.operator.as_deref())
            .chain(self.network_actions.iter().filter_map(|a| a.operator.as_deref()))
            .chain(self.range_actions.iter().filter_map(|a| a.operator.as_deref()))
            .collect()
    }
}
