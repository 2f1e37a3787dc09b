//! Population data: schemas, raw datasets and entity stores

mod dataset;
mod schema;
mod store;
mod table;

pub use dataset::Dataset;
pub use schema::{ColumnId, ColumnRole, ColumnSpec, EntityKind, Schema};
pub use store::{EntityStore, WEIGHT_COLUMN};
pub use table::Table;
