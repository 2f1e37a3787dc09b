//! Tax policy parameters and reforms

mod parameters;
mod reform;

pub use parameters::{
    ParameterSpec, ParameterValue, PolicyParameterStore, RangeAction, ValueRange, ValueType,
};
pub use reform::Reform;
