//! bandscore-core: Session orchestration, module evaluation, and band aggregation.
//!
//! This crate defines the data model, the collaborator traits, the module
//! evaluators, and the orchestrator that sequences an attempt through its
//! modules and reduces their scores to an overall band.

pub mod aggregate;
pub mod band;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod model;
pub mod objective;
pub mod orchestrator;
pub mod parser;
pub mod report;
pub mod speaking;
pub mod store;
pub mod traits;
pub mod writing;

#[cfg(test)]
mod testing;
