//! Simulation orchestration: year advance, calculation passes, queries
//! and marginal rate analysis

mod builder;
mod engine;
mod marginal;

#[cfg(test)]
mod tests;

pub use builder::SimulationBuilder;
pub use engine::{Simulation, YearTotals};
pub use marginal::{liability_column, MarginalRateRequest, MarginalRates};
