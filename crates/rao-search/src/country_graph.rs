//! Country adjacency used to skip network actions far from the limiting elements.

use std::collections::HashMap;

use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};

use rao_types::Country;

/// Undirected graph of countries linked by a shared boundary.
#[derive(Debug, Clone, Default)]
pub struct CountryGraph {
    graph: UnGraph<Country, ()>,
    nodes: HashMap<Country, NodeIndex>,
}

impl CountryGraph {
    pub fn new(boundaries: impl IntoIterator<Item = (Country, Country)>) -> Self {
        let mut graph = Self::default();
        for (a, b) in boundaries {
            let ia = graph.node(a);
            let ib = graph.node(b);
            if ia != ib && graph.graph.find_edge(ia, ib).is_none() {
                graph.graph.add_edge(ia, ib, ());
            }
        }
        graph
    }

    fn node(&mut self, country: Country) -> NodeIndex {
        if let Some(index) = self.nodes.get(&country) {
            return *index;
        }
        let index = self.graph.add_node(country.clone());
        self.nodes.insert(country, index);
        index
    }

    pub fn country_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `b` can be reached from `a` crossing at most `max_boundaries` borders.
    pub fn are_neighbors(&self, a: &str, b: &str, max_boundaries: usize) -> bool {
        if a == b {
            return true;
        }
        let (Some(&start), Some(&goal)) = (self.nodes.get(a), self.nodes.get(b)) else {
            return false;
        };
        dijkstra(&self.graph, start, Some(goal), |_| 1usize)
            .get(&goal)
            .is_some_and(|hops| *hops <= max_boundaries)
    }
}
