//! Flow data model: the DAG of recorded steps that is the unit of
//! persistence and execution.
//!
//! A [`Flow`] owns its nodes, edges and variable definitions. Only
//! default-labelled edges define the linear execution order; other labels
//! are looked up on demand when a conditional node picks a branch.

mod config;
mod errors;
mod invariant;
mod model;
mod target;
mod topo;

pub use config::*;
pub use errors::ModelError;
pub use invariant::{ensure_linear_invariant, rechain, validate_linear_invariant};
pub use model::*;
pub use target::*;
pub use topo::topological_order;
