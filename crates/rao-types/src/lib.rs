//! # rao-types
//!
//! Core types for the search-tree remedial action optimizer: the action and
//! constraint catalog of a perimeter, the network and sensitivity
//! collaborator traits, run parameters and shared result types.

pub mod crac;
pub mod errors;
pub mod network;
pub mod parameters;
pub mod results;
pub mod sensitivity;

pub use crac::*;
pub use errors::*;
pub use network::*;
pub use parameters::*;
pub use results::*;
pub use sensitivity::*;
