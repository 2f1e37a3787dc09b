//! File-based configuration
//!
//! Loads sample data, weights, growth factors and reforms from the
//! standard layout under data/.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SimResult;
use crate::growfactors::GrowthFactorTable;
use crate::policy::{PolicyParameterStore, Reform};
use crate::records::{Dataset, EntityKind, EntityStore, Schema};
use crate::simulation::{Simulation, SimulationBuilder};

/// Default path to the data directory
pub const DEFAULT_DATA_PATH: &str = "data";

/// Assessment year of the bundled samples
pub const DEFAULT_DATA_YEAR: i32 = 2017;

/// Input file locations
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub pit: PathBuf,
    pub pit_weights: PathBuf,
    pub cit: PathBuf,
    pub cit_weights: PathBuf,
    pub gst: PathBuf,
    pub gst_weights: PathBuf,
    pub growfactors: PathBuf,
}

impl DataFiles {
    /// Standard file names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            pit: dir.join("pit.csv"),
            pit_weights: dir.join("pit_weights.csv"),
            cit: dir.join("cit.csv"),
            cit_weights: dir.join("cit_weights.csv"),
            gst: dir.join("gst.csv"),
            gst_weights: dir.join("gst_weights.csv"),
            growfactors: dir.join("growfactors.csv"),
        }
    }

    pub fn data(&self, kind: EntityKind) -> &Path {
        match kind {
            EntityKind::Individual => &self.pit,
            EntityKind::Corporate => &self.cit,
            EntityKind::Consumption => &self.gst,
        }
    }

    pub fn weights(&self, kind: EntityKind) -> &Path {
        match kind {
            EntityKind::Individual => &self.pit_weights,
            EntityKind::Corporate => &self.cit_weights,
            EntityKind::Consumption => &self.gst_weights,
        }
    }

    /// Growth factors from the data directory, or the embedded table if
    /// the file is absent
    pub fn load_growth_factors(&self) -> SimResult<Arc<GrowthFactorTable>> {
        let table = if self.growfactors.exists() {
            GrowthFactorTable::from_path(&self.growfactors)?
        } else {
            log::info!(
                "{} not found; using embedded growth factors",
                self.growfactors.display()
            );
            GrowthFactorTable::builtin()?
        };
        Ok(Arc::new(table))
    }

    /// One population with its weights and growth factors attached
    ///
    /// A missing weights file leaves the store on unit weights.
    pub fn load_population(
        &self,
        kind: EntityKind,
        data_year: i32,
        growth: &Arc<GrowthFactorTable>,
    ) -> SimResult<EntityStore> {
        let dataset = Dataset::from_path(self.data(kind))?;
        let store = EntityStore::load(&dataset, Schema::builtin(kind)?, data_year)?
            .with_growth_factors(Arc::clone(growth))?;
        let weights = self.weights(kind);
        if weights.exists() {
            store.with_weights(&Dataset::from_path(weights)?)
        } else {
            log::warn!("{} not found; using unit weights", weights.display());
            Ok(store)
        }
    }

    /// Current-law simulation over every population, with an optional reform
    /// applied before construction
    pub fn load_simulation(&self, data_year: i32, reform: Option<&Reform>) -> SimResult<Simulation> {
        let growth = self.load_growth_factors()?;
        let mut policy = PolicyParameterStore::current_law_with(&growth)?;
        if let Some(reform) = reform {
            policy.implement_reform(reform)?;
        }
        SimulationBuilder::new(policy)
            .individual(self.load_population(EntityKind::Individual, data_year, &growth)?)
            .corporate(self.load_population(EntityKind::Corporate, data_year, &growth)?)
            .consumption(self.load_population(EntityKind::Consumption, data_year, &growth)?)
            .build()
    }
}

impl Default for DataFiles {
    fn default() -> Self {
        Self::in_dir(DEFAULT_DATA_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ParameterValue;

    fn bundled() -> DataFiles {
        DataFiles::in_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_DATA_PATH))
    }

    #[test]
    fn test_in_dir_paths() {
        let files = DataFiles::in_dir("/tmp/run");
        assert_eq!(files.cit, PathBuf::from("/tmp/run/cit.csv"));
        assert_eq!(files.weights(EntityKind::Consumption), Path::new("/tmp/run/gst_weights.csv"));
        assert_eq!(DataFiles::default().pit, PathBuf::from("data/pit.csv"));
    }

    #[test]
    fn test_load_bundled_simulation() {
        let sim = bundled().load_simulation(DEFAULT_DATA_YEAR, None).unwrap();
        assert_eq!(sim.current_year(), DEFAULT_DATA_YEAR);
        assert_eq!(sim.store(EntityKind::Individual).unwrap().rows(), 30);
        assert_eq!(sim.store(EntityKind::Corporate).unwrap().rows(), 12);
        assert_eq!(sim.store(EntityKind::Consumption).unwrap().rows(), 20);
        assert!(sim.total_weight(EntityKind::Individual).unwrap() > 30.0);
    }

    #[test]
    fn test_bundled_reform_applies() {
        let files = bundled();
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/reforms/budget_reform.json");
        let reform = Reform::from_path(&path).unwrap();
        let mut sim = files.load_simulation(DEFAULT_DATA_YEAR, Some(&reform)).unwrap();
        assert_eq!(sim.policy_param_at("rate4", 2020).unwrap(), &ParameterValue::Real(0.3));
        assert_eq!(sim.policy_param_at("rate4", 2025).unwrap(), &ParameterValue::Real(0.25));
        assert_eq!(sim.policy_param_at("mat_applies", 2023).unwrap(), &ParameterValue::Boolean(false));
        sim.advance_to_year(2023).unwrap();
        sim.calc_all().unwrap();
        assert!(sim.weighted_total(EntityKind::Individual, "pitax").unwrap() > 0.0);
        assert_eq!(sim.array(EntityKind::Corporate, "MAT").unwrap().iter().sum::<f64>(), 0.0);
    }

    #[test]
    fn test_missing_data_file_is_input_error() {
        let files = DataFiles::in_dir("/nonexistent/fiscal");
        let growth = files.load_growth_factors().unwrap();
        let err = files
            .load_population(EntityKind::Individual, DEFAULT_DATA_YEAR, &growth)
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Input);
    }
}
