//! Fiscal Sim - multi-year microsimulation engine for PIT, CIT and GST
//!
//! This library provides:
//! - Schema-driven entity stores for individual, corporate and consumption records
//! - Growth factor extrapolation and per-year sample reweighting
//! - Year-indexed policy parameters with price indexing and reforms
//! - Corporate loss, depreciation and MAT credit carryforward
//! - Ordered tax calculation pipelines and finite-difference marginal rates

pub mod calc;
pub mod carryforward;
pub mod config;
pub mod error;
pub mod growfactors;
pub mod policy;
pub mod records;
pub mod simulation;

// Re-export commonly used types
pub use config::DataFiles;
pub use error::{ErrorCategory, SimError, SimResult};
pub use growfactors::GrowthFactorTable;
pub use policy::{ParameterValue, PolicyParameterStore, Reform};
pub use records::{Dataset, EntityKind, EntityStore, Schema};
pub use simulation::{MarginalRateRequest, MarginalRates, Simulation, SimulationBuilder, YearTotals};
