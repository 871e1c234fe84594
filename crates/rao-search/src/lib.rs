//! # rao-search
//!
//! Search-tree optimizer over network remedial actions.
//!
//! Each leaf fixes a combination of network actions on its own pooled
//! network copy, then optimizes the range actions left by the usage-limit
//! filter. The tree blooms the optimal leaf depth after depth, evaluating
//! siblings in parallel and adopting those that improve enough.

mod bloomer;
mod combination;
mod context;
mod country_graph;
mod filter;
mod leaf;
mod pool;
mod result;
mod tree;

#[cfg(test)]
mod test_utils;

pub use bloomer::{BloomInput, Bloomer};
pub use combination::ActionCombination;
pub use context::{SearchContext, COST_EPSILON};
pub use country_graph::CountryGraph;
pub use filter::RangeActionFilter;
pub use leaf::{Leaf, LeafStatus};
pub use pool::{NetworkPool, PooledNetwork};
pub use result::{RunStatus, SearchTreeResult};
pub use tree::{improved_enough, BestLeafTracker, SearchTree};
