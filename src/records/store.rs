//! Array-backed entity store
//!
//! One store holds every column of one population for the current year,
//! plus the year cursor, sample weights and the growth factors used to
//! extrapolate read variables.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::dataset::Dataset;
use super::schema::{ColumnId, ColumnRole, EntityKind, Schema};
use super::table::Table;
use crate::error::{SimError, SimResult};
use crate::growfactors::GrowthFactorTable;

/// Pseudo-column name that addresses the sample weights
pub const WEIGHT_COLUMN: &str = "weight";

/// Per-year weight columns, already aligned to the store's rows
#[derive(Debug, Clone)]
struct WeightTable {
    by_year: BTreeMap<i32, Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct EntityStore {
    schema: Arc<Schema>,
    columns: Vec<Vec<f64>>,
    rows: usize,
    data_year: i32,
    current_year: i32,
    weight: Vec<f64>,
    weights: Option<WeightTable>,
    growth: Option<Arc<GrowthFactorTable>>,
    ignored: BTreeSet<String>,
}

impl EntityStore {
    /// Build a store from input data for assessment year `data_year`
    ///
    /// Columns the schema does not know are ignored. Absent optional read,
    /// ledger and calculated columns start as zeros.
    pub fn load(dataset: &Dataset, schema: Arc<Schema>, data_year: i32) -> SimResult<Self> {
        let rows = dataset.rows();
        let entity = schema.entity();
        let mut columns: Vec<Option<Vec<f64>>> = vec![None; schema.len()];
        let mut ignored = BTreeSet::new();

        for (name, values) in dataset.iter() {
            let Some(id) = schema.id(name) else {
                ignored.insert(name.to_string());
                continue;
            };
            match &schema.spec(id).role {
                ColumnRole::Read { integer, domain, .. } => {
                    if *integer {
                        if let Some(row) = values.iter().position(|v| v.fract() != 0.0) {
                            return Err(SimError::schema(format!(
                                "{entity} column {name} row {} holds non-integer value {}",
                                row + 1,
                                values[row]
                            )));
                        }
                    }
                    if let Some((lo, hi)) = domain {
                        if values.iter().any(|v| !(*lo..=*hi).contains(v)) {
                            return Err(SimError::schema(format!(
                                "not all {name} values in [{lo},{hi}] range"
                            )));
                        }
                    }
                    columns[id.index()] = Some(values.to_vec());
                }
                ColumnRole::Ledger => columns[id.index()] = Some(values.to_vec()),
                ColumnRole::Year => {}
                ColumnRole::Calculated { .. } => {
                    ignored.insert(name.to_string());
                }
            }
        }

        for (id, spec) in schema.columns() {
            if let ColumnRole::Read { required: true, .. } = spec.role {
                if columns[id.index()].is_none() {
                    return Err(SimError::MissingColumn {
                        entity,
                        column: spec.name.clone(),
                    });
                }
            }
        }

        let mut columns: Vec<Vec<f64>> = columns
            .into_iter()
            .map(|c| c.unwrap_or_else(|| vec![0.0; rows]))
            .collect();
        columns[schema.year_column().index()] = vec![f64::from(data_year); rows];

        log::info!("loaded {rows} {entity} records for {data_year}");
        if !ignored.is_empty() {
            let names: Vec<&str> = ignored.iter().map(String::as_str).collect();
            log::info!("{entity} data includes unused variables that will be ignored: {}", names.join(", "));
        }

        Ok(Self {
            schema,
            columns,
            rows,
            data_year,
            current_year: data_year,
            weight: vec![1.0; rows],
            weights: None,
            growth: None,
            ignored,
        })
    }

    /// Attach the growth factors used by [`EntityStore::increment_year`]
    pub fn with_growth_factors(mut self, table: Arc<GrowthFactorTable>) -> SimResult<Self> {
        let missing: Vec<&str> = self
            .schema
            .growth_mappings()
            .map(|(_, factor)| factor)
            .filter(|factor| !table.has_factor(factor))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !missing.is_empty() {
            return Err(SimError::schema(format!(
                "growth factor table lacks factors used by {} data: {}",
                self.entity(),
                missing.join(", ")
            )));
        }
        self.growth = Some(table);
        Ok(self)
    }

    /// Attach sample weights, one `WT<year>` column per year
    ///
    /// A weight file longer than the data is treated as the full population
    /// the data was sampled from: its first rows are kept and rescaled so each
    /// year's total is preserved. A shorter file is spread uniformly.
    pub fn with_weights(mut self, weights: &Dataset) -> SimResult<Self> {
        let n = self.rows;
        let mut by_year = BTreeMap::new();
        for (name, values) in weights.iter() {
            let year: i32 = name
                .strip_prefix("WT")
                .and_then(|y| y.parse().ok())
                .ok_or_else(|| {
                    SimError::schema(format!("weight column {name} is not of the form WT<year>"))
                })?;
            let full: f64 = values.iter().sum();
            let aligned = if values.len() > n {
                let sub = &values[..n];
                let sub_total: f64 = sub.iter().sum();
                if sub_total == 0.0 {
                    return Err(SimError::schema(format!(
                        "weight column {name} sums to zero over the first {n} rows and cannot be rescaled"
                    )));
                }
                let factor = full / sub_total;
                sub.iter().map(|w| w * factor).collect()
            } else if values.len() < n {
                vec![full / n as f64; n]
            } else {
                values.to_vec()
            };
            by_year.insert(year, aligned);
        }
        if weights.rows() != n {
            log::info!(
                "{} weights have {} rows for {n} records; rescaled",
                self.entity(),
                weights.rows()
            );
        }
        let table = WeightTable { by_year };
        match table.by_year.get(&self.current_year) {
            Some(w) => self.weight = w.clone(),
            None => log::warn!(
                "no WT{} column in {} weights; using unit weights",
                self.current_year,
                self.entity()
            ),
        }
        self.weights = Some(table);
        Ok(self)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn entity(&self) -> EntityKind {
        self.schema.entity()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn data_year(&self) -> i32 {
        self.data_year
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn ignored_columns(&self) -> &BTreeSet<String> {
        &self.ignored
    }

    pub fn growth_factors(&self) -> Option<&Arc<GrowthFactorTable>> {
        self.growth.as_ref()
    }

    /// Fails if the next year cannot be extrapolated; mutates nothing
    pub fn check_advance(&self) -> SimResult<()> {
        let next = self.current_year + 1;
        if let Some(table) = &self.growth {
            if self.schema.growth_mappings().next().is_some() && !table.contains_year(next) {
                return Err(SimError::range(format!(
                    "cannot extrapolate {} data to {next}: growth factors cover {}-{}",
                    self.entity(),
                    table.first_year(),
                    table.last_year()
                )));
            }
        }
        Ok(())
    }

    /// Move to the next year: extrapolate read variables and reselect weights
    pub fn increment_year(&mut self) -> SimResult<()> {
        self.check_advance()?;
        let next = self.current_year + 1;

        if let Some(table) = &self.growth {
            let factors = self
                .schema
                .growth_mappings()
                .map(|(id, name)| Ok((id, table.factor_value(name, next)?)))
                .collect::<SimResult<Vec<_>>>()?;
            for (id, factor) in factors {
                self.columns[id.index()].iter_mut().for_each(|v| *v *= factor);
            }
        }

        if let Some(table) = &self.weights {
            match table.by_year.get(&next) {
                Some(w) => self.weight = w.clone(),
                None => {
                    let uniform = if self.rows > 0 {
                        self.total_weight() / self.rows as f64
                    } else {
                        0.0
                    };
                    log::warn!(
                        "no WT{next} column in {} weights; using uniform weight {uniform}",
                        self.entity()
                    );
                    self.weight = vec![uniform; self.rows];
                }
            }
        }

        self.set_year(next);
        log::debug!("{} data advanced to {next}", self.entity());
        Ok(())
    }

    /// Relabel the current year without extrapolating or reweighting
    pub fn set_year(&mut self, year: i32) {
        self.current_year = year;
        self.columns[self.schema.year_column().index()].fill(f64::from(year));
    }

    pub fn zero_changing_calculated(&mut self) {
        for id in self.schema.changing_calculated() {
            self.columns[id.index()].fill(0.0);
        }
    }

    pub fn column(&self, id: ColumnId) -> &[f64] {
        &self.columns[id.index()]
    }

    pub fn set(&mut self, id: ColumnId, values: Vec<f64>) -> SimResult<()> {
        if values.len() != self.rows {
            return Err(SimError::config(format!(
                "{} column {} needs {} values, got {}",
                self.entity(),
                self.schema.name(id),
                self.rows,
                values.len()
            )));
        }
        self.columns[id.index()] = values;
        Ok(())
    }

    pub fn weights(&self) -> &[f64] {
        &self.weight
    }

    /// Column by name; `weight` addresses the sample weights
    pub fn column_by_name(&self, name: &str) -> SimResult<&[f64]> {
        if name == WEIGHT_COLUMN {
            return Ok(&self.weight);
        }
        Ok(self.column(self.schema.require(name)?))
    }

    pub fn set_by_name(&mut self, name: &str, values: Vec<f64>) -> SimResult<()> {
        if name == WEIGHT_COLUMN {
            if values.len() != self.rows {
                return Err(SimError::config(format!(
                    "weight needs {} values, got {}",
                    self.rows,
                    values.len()
                )));
            }
            self.weight = values;
            return Ok(());
        }
        let id = self.schema.require(name)?;
        self.set(id, values)
    }

    /// Element-wise product of a column and the weights
    pub fn weighted(&self, name: &str) -> SimResult<Vec<f64>> {
        let values = self.column_by_name(name)?;
        Ok(values.iter().zip(&self.weight).map(|(v, w)| v * w).collect())
    }

    pub fn weighted_total(&self, name: &str) -> SimResult<f64> {
        let values = self.column_by_name(name)?;
        Ok(values.iter().zip(&self.weight).map(|(v, w)| v * w).sum())
    }

    pub fn total_weight(&self) -> f64 {
        self.weight.iter().sum()
    }

    /// Copy the named columns into a table
    pub fn table(&self, names: &[&str]) -> SimResult<Table> {
        let columns = names
            .iter()
            .map(|name| self.column_by_name(name).map(<[f64]>::to_vec))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Table::new(names.iter().map(|n| n.to_string()).collect(), columns))
    }
}
