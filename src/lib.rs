//! TWS Topology
//!
//! Procedure and script orchestration for a pair of earbuds deciding which
//! one is Primary. The goal layer drives everything through [`Topology`].

pub mod domain;
pub mod infrastructure;
pub mod procedures;
pub mod topology;

#[cfg(test)]
mod testing;

pub use domain::models::{ProcResult, ProcedureEvent, ProcedureId, ProcedureParams};
pub use procedures::ContractViolation;
pub use topology::Topology;
