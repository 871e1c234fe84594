//! Candidate generation: every network action that may extend a leaf's
//! combination by one, after usage-limit and geography pruning.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use rao_types::{
    Country, Network, NetworkAction, OptimizationPerimeter, PrePerimeterState,
    RangeActionActivation, RaUsageLimits, TreeParameters,
};

use crate::combination::ActionCombination;
use crate::country_graph::CountryGraph;

/// What the bloomer needs to know about the leaf being expanded.
#[derive(Debug, Clone)]
pub struct BloomInput<'a> {
    pub combination: &'a ActionCombination,
    pub activation: &'a RangeActionActivation,
    pub most_limiting_cnec: Option<&'a str>,
    /// CNECs carrying a non-zero virtual cost.
    pub costly_cnecs: Vec<&'a str>,
    pub constrained_cnecs: HashSet<String>,
}

/// Skips network actions located more than `max_boundaries` borders away
/// from the elements driving the cost.
#[derive(Debug, Clone)]
struct FarFilter {
    graph: CountryGraph,
    max_boundaries: usize,
    /// `None` when one of the action's elements has no known country.
    action_countries: HashMap<String, Option<BTreeSet<Country>>>,
    cnec_countries: HashMap<String, Option<Country>>,
}

impl FarFilter {
    fn new(perimeter: &OptimizationPerimeter, network: &dyn Network, max_boundaries: usize) -> Self {
        let action_countries = perimeter
            .network_actions
            .iter()
            .map(|na| {
                let countries: Option<BTreeSet<Country>> =
                    na.network_elements().map(|e| network.country_of(e)).collect();
                (na.id.clone(), countries.filter(|c| !c.is_empty()))
            })
            .collect();
        let cnec_countries = perimeter
            .cnecs
            .iter()
            .map(|c| (c.id.clone(), network.country_of(&c.network_element)))
            .collect();
        Self {
            graph: CountryGraph::new(network.country_boundaries()),
            max_boundaries,
            action_countries,
            cnec_countries,
        }
    }

    fn keeps(&self, action: &NetworkAction, limiting_cnecs: &[&str]) -> bool {
        if limiting_cnecs.is_empty() {
            return true;
        }
        let Some(Some(action_countries)) = self.action_countries.get(&action.id) else {
            return true;
        };
        let mut limiting_countries = Vec::with_capacity(limiting_cnecs.len());
        for cnec in limiting_cnecs {
            match self.cnec_countries.get(*cnec) {
                Some(Some(country)) => limiting_countries.push(country),
                _ => return true,
            }
        }
        action_countries.iter().any(|a| {
            limiting_countries
                .iter()
                .any(|c| self.graph.are_neighbors(a, c, self.max_boundaries))
        })
    }
}

pub struct Bloomer {
    limits: RaUsageLimits,
    far_filter: Option<FarFilter>,
}

impl Bloomer {
    pub fn new(perimeter: &OptimizationPerimeter, parameters: &TreeParameters, network: &dyn Network) -> Self {
        let far_filter = parameters
            .max_boundaries_for_skipping_network_actions
            .map(|max| FarFilter::new(perimeter, network, max));
        Self {
            limits: parameters.usage_limits.clone(),
            far_filter,
        }
    }

    /// Combinations extending `input.combination` with one more network
    /// action, in evaluation order.
    pub fn bloom(
        &self,
        perimeter: &OptimizationPerimeter,
        pre_perimeter: &PrePerimeterState,
        input: &BloomInput<'_>,
    ) -> Vec<ActionCombination> {
        let activated: Vec<&NetworkAction> = input
            .combination
            .action_ids()
            .filter_map(|id| perimeter.network_action(id))
            .collect();
        let used_range_actions: Vec<Option<&str>> = perimeter
            .range_actions
            .iter()
            .filter(|ra| input.activation.is_used(&ra.id, pre_perimeter))
            .map(|ra| ra.operator.as_deref())
            .collect();

        if let Some(max_ra) = self.limits.max_ra {
            if activated.len() + used_range_actions.len() >= max_ra {
                debug!(leaf = %input.combination, max_ra, "max remedial actions reached, nothing to bloom");
                return Vec::new();
            }
        }

        let mut candidates: Vec<&NetworkAction> = perimeter
            .network_actions
            .iter()
            .filter(|na| !input.combination.contains(&na.id))
            .filter(|na| na.usage_rule.is_available(&input.constrained_cnecs))
            .collect();
        let available = candidates.len();

        self.remove_full_operators(&mut candidates, &activated, &used_range_actions);
        self.remove_new_operators(&mut candidates, input.combination);
        self.remove_elementary_overflow(&mut candidates, &activated);

        if let Some(far_filter) = &self.far_filter {
            let mut limiting: Vec<&str> = input.most_limiting_cnec.into_iter().collect();
            limiting.extend(input.costly_cnecs.iter().copied());
            candidates.retain(|na| far_filter.keeps(na, &limiting));
        }

        let mut children: Vec<ActionCombination> = candidates
            .into_iter()
            .map(|na| input.combination.extended_with(na))
            .collect();
        children.sort();
        debug!(
            leaf = %input.combination,
            available,
            kept = children.len(),
            "bloomed"
        );
        children
    }

    /// Drops actions of operators that exhausted their topological or
    /// total remedial action budget.
    fn remove_full_operators(
        &self,
        candidates: &mut Vec<&NetworkAction>,
        activated: &[&NetworkAction],
        used_range_actions: &[Option<&str>],
    ) {
        let activated_for = |tso: &str| {
            activated
                .iter()
                .filter(|na| na.operator.as_deref() == Some(tso))
                .count()
        };
        let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
        for (tso, cap) in &self.limits.max_topo_per_tso {
            let left = cap.saturating_sub(activated_for(tso.as_str()));
            remaining
                .entry(tso.as_str())
                .and_modify(|r| *r = (*r).min(left))
                .or_insert(left);
        }
        for (tso, cap) in &self.limits.max_ra_per_tso {
            let used = used_range_actions.iter().filter(|op| **op == Some(tso.as_str())).count();
            let left = cap.saturating_sub(activated_for(tso.as_str()) + used);
            remaining
                .entry(tso.as_str())
                .and_modify(|r| *r = (*r).min(left))
                .or_insert(left);
        }
        candidates.retain(|na| {
            na.operator
                .as_deref()
                .and_then(|tso| remaining.get(tso))
                .map_or(true, |left| *left > 0)
        });
    }

    /// Once the operator cap is reached, only operators already owning an
    /// activated network action may add more. Range actions do not count.
    fn remove_new_operators(&self, candidates: &mut Vec<&NetworkAction>, combination: &ActionCombination) {
        let Some(max_tso) = self.limits.max_tso else {
            return;
        };
        let active = combination.operators();
        if active.len() < max_tso {
            return;
        }
        candidates.retain(|na| na.operator.as_ref().map_or(true, |op| active.contains(op)));
    }

    fn remove_elementary_overflow(&self, candidates: &mut Vec<&NetworkAction>, activated: &[&NetworkAction]) {
        if self.limits.max_elementary_actions_per_tso.is_empty() {
            return;
        }
        candidates.retain(|na| {
            let Some(tso) = na.operator.as_deref() else {
                return true;
            };
            let Some(cap) = self.limits.max_elementary_actions_per_tso.get(tso) else {
                return true;
            };
            let already: usize = activated
                .iter()
                .filter(|a| a.operator.as_deref() == Some(tso))
                .map(|a| a.elementary_actions.len())
                .sum();
            already + na.elementary_actions.len() <= *cap
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockNetwork;
    use rao_types::{Cnec, ElementaryAction, PstTap, RangeAction, UsageRule};

    fn sample_perimeter() -> OptimizationPerimeter {
        OptimizationPerimeter::new()
            .with_cnec(Cnec::new("cnec-fr", "line-fr").with_limit(100.0))
            .with_cnec(Cnec::new("cnec-es", "line-es").with_limit(100.0))
            .with_network_action(
                NetworkAction::new("open-fr-1")
                    .with_operator("FR")
                    .with_elementary_action(ElementaryAction::open("sw-fr-1")),
            )
            .with_network_action(
                NetworkAction::new("open-fr-2")
                    .with_operator("FR")
                    .with_elementary_action(ElementaryAction::open("sw-fr-2"))
                    .with_elementary_action(ElementaryAction::open("sw-fr-3")),
            )
            .with_network_action(
                NetworkAction::new("open-be")
                    .with_operator("BE")
                    .with_elementary_action(ElementaryAction::open("sw-be")),
            )
            .with_network_action(
                NetworkAction::new("open-nl")
                    .with_operator("NL")
                    .with_elementary_action(ElementaryAction::open("sw-nl")),
            )
            .with_range_action(
                RangeAction::pst(
                    "pst-fr",
                    "pst-fr",
                    vec![PstTap { tap: 0, angle: 0.0 }, PstTap { tap: 1, angle: 2.0 }],
                )
                .with_operator("FR"),
            )
    }

    fn sample_network() -> MockNetwork {
        MockNetwork::new()
            .with_country("sw-fr-1", "FR")
            .with_country("sw-fr-2", "FR")
            .with_country("sw-fr-3", "FR")
            .with_country("sw-be", "BE")
            .with_country("sw-nl", "NL")
            .with_country("line-fr", "FR")
            .with_country("line-es", "ES")
            .with_boundary("ES", "FR")
            .with_boundary("FR", "BE")
            .with_boundary("BE", "NL")
    }

    fn pre_perimeter() -> PrePerimeterState {
        let mut pre = PrePerimeterState::default();
        pre.setpoints.insert("pst-fr".into(), 0.0);
        pre
    }

    fn bloom(
        parameters: &TreeParameters,
        combination: &ActionCombination,
        activation: &RangeActionActivation,
        most_limiting: Option<&str>,
    ) -> Vec<String> {
        let perimeter = sample_perimeter();
        let bloomer = Bloomer::new(&perimeter, parameters, &sample_network());
        let input = BloomInput {
            combination,
            activation,
            most_limiting_cnec: most_limiting,
            costly_cnecs: Vec::new(),
            constrained_cnecs: HashSet::new(),
        };
        bloomer
            .bloom(&perimeter, &pre_perimeter(), &input)
            .iter()
            .map(ActionCombination::concatenated_id)
            .collect()
    }

    fn combination_of(ids: &[&str]) -> ActionCombination {
        let perimeter = sample_perimeter();
        ActionCombination::from_actions(ids.iter().filter_map(|id| perimeter.network_action(id)))
    }

    #[test]
    fn children_extend_by_exactly_one_new_action() {
        let parent = combination_of(&["open-be"]);
        let children = bloom(&TreeParameters::default(), &parent, &RangeActionActivation::new(), None);
        assert_eq!(
            children,
            vec!["open-be + open-fr-1", "open-be + open-fr-2", "open-be + open-nl"]
        );
    }

    #[test]
    fn operator_with_topo_and_range_action_is_full() {
        let parameters =
            TreeParameters::default().with_usage_limits(RaUsageLimits::default().with_max_ra_per_tso("FR", 2));
        let parent = combination_of(&["open-fr-1"]);
        let mut activation = RangeActionActivation::new();
        activation.set("pst-fr", 2.0, Some(1));

        let children = bloom(&parameters, &parent, &activation, None);
        assert_eq!(children, vec!["open-be + open-fr-1", "open-fr-1 + open-nl"]);

        // the same PST left untouched frees one slot
        let children = bloom(&parameters, &parent, &RangeActionActivation::new(), None);
        assert!(children.contains(&"open-fr-1 + open-fr-2".to_string()));
    }

    #[test]
    fn topo_cap_ignores_range_actions() {
        let parameters =
            TreeParameters::default().with_usage_limits(RaUsageLimits::default().with_max_topo_per_tso("FR", 2));
        let parent = combination_of(&["open-fr-1"]);
        let mut activation = RangeActionActivation::new();
        activation.set("pst-fr", 2.0, Some(1));

        let children = bloom(&parameters, &parent, &activation, None);
        assert!(children.contains(&"open-fr-1 + open-fr-2".to_string()));
    }

    #[test]
    fn operator_cap_counts_network_action_operators() {
        let parameters = TreeParameters::default().with_usage_limits(RaUsageLimits::default().with_max_tso(1));
        let parent = combination_of(&["open-fr-1"]);
        // the moved FR PST does not matter, the BE and NL actions are refused
        let children = bloom(&parameters, &parent, &RangeActionActivation::new(), None);
        assert_eq!(children, vec!["open-fr-1 + open-fr-2"]);

        let children = bloom(&parameters, &ActionCombination::root(), &RangeActionActivation::new(), None);
        assert_eq!(children.len(), 4);
    }

    #[test]
    fn elementary_actions_per_operator() {
        let parameters = TreeParameters::default()
            .with_usage_limits(RaUsageLimits::default().with_max_elementary_actions_per_tso("FR", 2));
        let parent = combination_of(&["open-fr-1"]);
        let children = bloom(&parameters, &parent, &RangeActionActivation::new(), None);
        assert!(!children.iter().any(|c| c.contains("open-fr-2")));

        let children = bloom(&parameters, &ActionCombination::root(), &RangeActionActivation::new(), None);
        assert!(children.contains(&"open-fr-2".to_string()));
    }

    #[test]
    fn global_cap_stops_blooming() {
        let parameters = TreeParameters::default().with_usage_limits(RaUsageLimits::default().with_max_ra(2));
        let parent = combination_of(&["open-be"]);
        let mut activation = RangeActionActivation::new();
        activation.set("pst-fr", 2.0, Some(1));
        assert!(bloom(&parameters, &parent, &activation, None).is_empty());
        assert_eq!(bloom(&parameters, &parent, &RangeActionActivation::new(), None).len(), 3);
    }

    #[test]
    fn far_actions_are_skipped() {
        let parameters = TreeParameters::default().with_skip_far_network_actions(1);
        let children = bloom(
            &parameters,
            &ActionCombination::root(),
            &RangeActionActivation::new(),
            Some("cnec-es"),
        );
        // NL is three borders away from ES, BE two
        assert_eq!(children, vec!["open-fr-1", "open-fr-2"]);

        let children = bloom(&parameters, &ActionCombination::root(), &RangeActionActivation::new(), None);
        assert_eq!(children.len(), 4);
    }

    #[test]
    fn actions_near_costly_elements_are_kept() {
        let perimeter = sample_perimeter()
            .with_cnec(Cnec::new("mnec-nl", "line-nl").with_limit(100.0).monitored_only());
        let network = sample_network().with_country("line-nl", "NL");
        let parameters = TreeParameters::default().with_skip_far_network_actions(0);
        let bloomer = Bloomer::new(&perimeter, &parameters, &network);
        let root = ActionCombination::root();
        let activation = RangeActionActivation::new();
        let mut input = BloomInput {
            combination: &root,
            activation: &activation,
            most_limiting_cnec: Some("cnec-es"),
            costly_cnecs: Vec::new(),
            constrained_cnecs: HashSet::new(),
        };
        // nothing sits in ES
        assert!(bloomer.bloom(&perimeter, &pre_perimeter(), &input).is_empty());

        input.costly_cnecs.push("mnec-nl");
        let children: Vec<String> = bloomer
            .bloom(&perimeter, &pre_perimeter(), &input)
            .iter()
            .map(ActionCombination::concatenated_id)
            .collect();
        assert_eq!(children, vec!["open-nl"]);
    }

    #[test]
    fn unknown_locations_are_kept() {
        let perimeter = sample_perimeter()
            .with_network_action(NetworkAction::new("open-unknown").with_elementary_action(ElementaryAction::open("sw-x")));
        let parameters = TreeParameters::default().with_skip_far_network_actions(0);
        let bloomer = Bloomer::new(&perimeter, &parameters, &sample_network());
        let root = ActionCombination::root();
        let activation = RangeActionActivation::new();
        let input = BloomInput {
            combination: &root,
            activation: &activation,
            most_limiting_cnec: Some("cnec-fr"),
            costly_cnecs: Vec::new(),
            constrained_cnecs: HashSet::new(),
        };
        let children: Vec<String> = bloomer
            .bloom(&perimeter, &pre_perimeter(), &input)
            .iter()
            .map(ActionCombination::concatenated_id)
            .collect();
        assert_eq!(children, vec!["open-fr-1", "open-fr-2", "open-unknown"]);
    }

    #[test]
    fn unavailable_actions_are_not_bloomed() {
        let perimeter = sample_perimeter()
            .with_network_action(NetworkAction::new("never").with_usage_rule(UsageRule::Unavailable))
            .with_network_action(
                NetworkAction::new("on-fr").with_usage_rule(UsageRule::OnConstraint { cnec_id: "cnec-fr".into() }),
            );
        let bloomer = Bloomer::new(&perimeter, &TreeParameters::default(), &sample_network());
        let root = ActionCombination::root();
        let activation = RangeActionActivation::new();
        let mut input = BloomInput {
            combination: &root,
            activation: &activation,
            most_limiting_cnec: None,
            costly_cnecs: Vec::new(),
            constrained_cnecs: HashSet::new(),
        };
        assert_eq!(bloomer.bloom(&perimeter, &pre_perimeter(), &input).len(), 4);

        input.constrained_cnecs.insert("cnec-fr".into());
        let children = bloomer.bloom(&perimeter, &pre_perimeter(), &input);
        assert_eq!(children.len(), 5);
        assert!(children.iter().any(|c| c.contains("on-fr")));
    }
}
