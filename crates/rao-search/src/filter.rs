//! Usage-limit filtering of the range actions handed to a leaf's continuous
//! optimization.
//!
//! Range actions sharing a group id form one unit: units are ranked, kept
//! or dropped as a whole. Units holding a range action already moved in the
//! leaf are never dropped.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use rao_types::{
    NetworkAction, PrePerimeterState, RangeAction, RangeActionActivation, RaUsageLimits,
    SensitivityResult,
};

#[derive(Debug, Clone)]
struct Unit<'a> {
    members: Vec<&'a RangeAction>,
    /// Largest absolute sensitivity of a member on the most limiting element.
    impact: f64,
    used: bool,
    key: String,
}

impl Unit<'_> {
    fn operators(&self) -> BTreeSet<&str> {
        self.members.iter().filter_map(|ra| ra.operator.as_deref()).collect()
    }

    fn count_for(&self, tso: &str, counted: fn(&RangeAction) -> bool) -> usize {
        self.members
            .iter()
            .filter(|ra| ra.operator.as_deref() == Some(tso) && counted(ra))
            .count()
    }
}

pub struct RangeActionFilter<'a> {
    units: Vec<Unit<'a>>,
    applied_network_actions: Vec<&'a NetworkAction>,
}

impl<'a> RangeActionFilter<'a> {
    pub fn new(
        range_actions: &'a [RangeAction],
        applied_network_actions: Vec<&'a NetworkAction>,
        activation: &RangeActionActivation,
        pre_perimeter: &PrePerimeterState,
        sensitivity: &SensitivityResult,
        most_limiting_cnec: Option<&str>,
    ) -> Self {
        let mut grouped: BTreeMap<String, Vec<&'a RangeAction>> = BTreeMap::new();
        let mut order = Vec::new();
        for ra in range_actions {
            let key = ra.group_id.clone().unwrap_or_else(|| ra.id.clone());
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            grouped.entry(key).or_default().push(ra);
        }
        let units = order
            .into_iter()
            .filter_map(|key| {
                let members = grouped.remove(&key)?;
                let impact = most_limiting_cnec.map_or(0.0, |cnec| {
                    members
                        .iter()
                        .map(|ra| sensitivity.sensitivity(cnec, &ra.id).abs())
                        .fold(0.0, f64::max)
                });
                let used = members.iter().any(|ra| activation.is_used(&ra.id, pre_perimeter));
                Some(Unit {
                    members,
                    impact,
                    used,
                    key,
                })
            })
            .collect();
        Self {
            units,
            applied_network_actions,
        }
    }

    fn applied_for(&self, tso: &str) -> usize {
        self.applied_network_actions
            .iter()
            .filter(|na| na.operator.as_deref() == Some(tso))
            .count()
    }

    /// Unit indices by decreasing impact, ties broken by key.
    fn ranked(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.units.len()).collect();
        indices.sort_by(|&a, &b| {
            let (ua, ub) = (&self.units[a], &self.units[b]);
            ub.impact.total_cmp(&ua.impact).then_with(|| ua.key.cmp(&ub.key))
        });
        indices
    }

    fn retain_flags(&mut self, keep: Vec<bool>, reason: &str) {
        let before = self.len();
        let mut flags = keep.into_iter();
        self.units.retain(|_| flags.next().unwrap_or(true));
        if self.len() < before {
            debug!(removed = before - self.len(), reason, "range actions filtered");
        }
    }

    /// Keeps used units, then the most impactful ones while their weight fits in `limit`.
    fn keep_within(&mut self, limit: usize, weight: impl Fn(&Unit<'_>) -> usize, reason: &str) {
        let mut keep = vec![false; self.units.len()];
        let mut total = 0;
        for (i, unit) in self.units.iter().enumerate() {
            if unit.used {
                keep[i] = true;
                total += weight(unit);
            }
        }
        for i in self.ranked() {
            if keep[i] {
                continue;
            }
            let w = weight(&self.units[i]);
            if w == 0 {
                keep[i] = true;
            } else if total + w <= limit {
                keep[i] = true;
                total += w;
            }
        }
        self.retain_flags(keep, reason);
    }

    /// Drops units that are neither used nor available in the current situation.
    pub fn filter_unavailable(&mut self, constrained_cnecs: &HashSet<String>) {
        let keep = self
            .units
            .iter()
            .map(|u| u.used || u.members.iter().all(|ra| ra.usage_rule.is_available(constrained_cnecs)))
            .collect();
        self.retain_flags(keep, "unavailable");
    }

    /// Caps the number of PSTs per operator.
    pub fn filter_pst_per_tso(&mut self, max_pst_per_tso: &std::collections::HashMap<String, usize>) {
        let caps: BTreeMap<&String, &usize> = max_pst_per_tso.iter().collect();
        for (tso, cap) in caps {
            self.keep_within(*cap, |u| u.count_for(tso, RangeAction::is_pst), "max-pst-per-tso");
        }
    }

    /// Caps the number of range actions per operator, minus the network
    /// actions that operator already applied.
    pub fn filter_ra_per_tso(&mut self, max_ra_per_tso: &std::collections::HashMap<String, usize>) {
        let caps: BTreeMap<&String, &usize> = max_ra_per_tso.iter().collect();
        for (tso, cap) in caps {
            let limit = cap.saturating_sub(self.applied_for(tso));
            self.keep_within(limit, |u| u.count_for(tso, |_| true), "max-ra-per-tso");
        }
    }

    /// Limits the number of distinct operators. Operators already active
    /// through network actions or used range actions stay; new operators
    /// are admitted by decreasing impact of their range actions.
    pub fn filter_tsos(&mut self, max_tso: Option<usize>) {
        let Some(max_tso) = max_tso else {
            return;
        };
        let mut active: BTreeSet<&str> = self
            .applied_network_actions
            .iter()
            .filter_map(|na| na.operator.as_deref())
            .collect();
        for unit in self.units.iter().filter(|u| u.used) {
            active.extend(unit.operators());
        }
        let remaining = max_tso.saturating_sub(active.len());

        let mut selected: BTreeSet<&str> = BTreeSet::new();
        let mut keep = vec![false; self.units.len()];
        for i in self.ranked() {
            let unit = &self.units[i];
            if unit.used {
                keep[i] = true;
                continue;
            }
            let new: BTreeSet<&str> = unit
                .operators()
                .into_iter()
                .filter(|op| !active.contains(op) && !selected.contains(op))
                .collect();
            if new.is_empty() {
                keep[i] = true;
            } else if selected.len() + new.len() <= remaining {
                selected.extend(new);
                keep[i] = true;
            }
        }
        self.retain_flags(keep, "max-tso");
    }

    /// Caps the total number of remedial actions, network actions included.
    pub fn filter_max_ras(&mut self, max_ra: Option<usize>) {
        let Some(max_ra) = max_ra else {
            return;
        };
        let limit = max_ra.saturating_sub(self.applied_network_actions.len());
        self.keep_within(limit, |u| u.members.len(), "max-ra");
    }

    pub fn apply_usage_limits(&mut self, limits: &RaUsageLimits) {
        self.filter_pst_per_tso(&limits.max_pst_per_tso);
        self.filter_ra_per_tso(&limits.max_ra_per_tso);
        self.filter_tsos(limits.max_tso);
        self.filter_max_ras(limits.max_ra);
    }

    pub fn len(&self) -> usize {
        self.units.iter().map(|u| u.members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn range_actions(&self) -> Vec<RangeAction> {
        self.units
            .iter()
            .flat_map(|u| u.members.iter().map(|ra| (*ra).clone()))
            .collect()
    }
}
