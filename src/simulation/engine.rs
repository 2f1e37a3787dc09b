//! Multi-year simulation over the three populations

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::calc::Pipeline;
use crate::carryforward::CarryforwardLedger;
use crate::error::{SimError, SimResult};
use crate::policy::{ParameterValue, PolicyParameterStore, Reform};
use crate::records::{EntityKind, EntityStore, Table};

/// One attached population and the sequence that computes it
#[derive(Clone)]
pub(super) struct Population {
    pub(super) store: EntityStore,
    pub(super) pipeline: Arc<Pipeline>,
    pub(super) ledger: Option<CarryforwardLedger>,
}

impl Population {
    pub(super) fn new(store: EntityStore) -> SimResult<Self> {
        let pipeline = Arc::new(Pipeline::standard(store.schema())?);
        let ledger = match store.entity() {
            EntityKind::Corporate => Some(CarryforwardLedger::bind(store.schema())?),
            _ => None,
        };
        Ok(Self {
            store,
            pipeline,
            ledger,
        })
    }
}

/// Saved state of one population for marginal rate analysis
#[derive(Clone)]
pub(super) struct StoreSnapshot {
    pub(super) kind: EntityKind,
    pub(super) store: EntityStore,
}

/// Weighted totals for one simulated year
#[derive(Debug, Clone, Serialize)]
pub struct YearTotals {
    pub year: i32,
    /// Keyed by `<entity>.<column>`
    pub totals: BTreeMap<String, f64>,
}

/// Owns a policy and up to one population of each kind, all on the same year
///
/// Build one with [`crate::simulation::SimulationBuilder`]. Every mutator
/// leaves the policy year equal to every store year.
#[derive(Clone)]
pub struct Simulation {
    pub(super) policy: PolicyParameterStore,
    pub(super) individual: Option<Population>,
    pub(super) corporate: Option<Population>,
    pub(super) consumption: Option<Population>,
    pub(super) stored: Option<StoreSnapshot>,
    /// Whether the calculated columns reflect the current inputs and policy
    pub(super) computed: bool,
}

impl Simulation {
    pub fn current_year(&self) -> i32 {
        self.policy.current_year()
    }

    pub fn policy(&self) -> &PolicyParameterStore {
        &self.policy
    }

    pub fn has(&self, kind: EntityKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Attached population kinds in calculation order
    pub fn kinds(&self) -> Vec<EntityKind> {
        [EntityKind::Corporate, EntityKind::Individual, EntityKind::Consumption]
            .into_iter()
            .filter(|k| self.has(*k))
            .collect()
    }

    fn slot(&self, kind: EntityKind) -> Option<&Population> {
        match kind {
            EntityKind::Individual => self.individual.as_ref(),
            EntityKind::Corporate => self.corporate.as_ref(),
            EntityKind::Consumption => self.consumption.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: EntityKind) -> Option<&mut Population> {
        match kind {
            EntityKind::Individual => self.individual.as_mut(),
            EntityKind::Corporate => self.corporate.as_mut(),
            EntityKind::Consumption => self.consumption.as_mut(),
        }
    }

    pub(super) fn population(&self, kind: EntityKind) -> SimResult<&Population> {
        self.slot(kind)
            .ok_or_else(|| SimError::config(format!("simulation has no {kind} data")))
    }

    fn population_mut(&mut self, kind: EntityKind) -> SimResult<&mut Population> {
        self.slot_mut(kind)
            .ok_or_else(|| SimError::config(format!("simulation has no {kind} data")))
    }

    pub fn store(&self, kind: EntityKind) -> SimResult<&EntityStore> {
        Ok(&self.population(kind)?.store)
    }

    pub fn data_year(&self, kind: EntityKind) -> SimResult<i32> {
        Ok(self.store(kind)?.data_year())
    }

    /// Carryforward ledger of the corporate population, if attached
    pub fn ledger(&self) -> Option<&CarryforwardLedger> {
        self.corporate.as_ref().and_then(|p| p.ledger.as_ref())
    }

    /// Year moves are refused while a snapshot is outstanding
    fn check_no_snapshot(&self, action: &str) -> SimResult<()> {
        match &self.stored {
            Some(stored) => Err(SimError::invariant(format!(
                "cannot {action} while a {} snapshot is outstanding",
                stored.kind
            ))),
            None => Ok(()),
        }
    }

    pub(super) fn check_invariant(&self) -> SimResult<()> {
        let year = self.policy.current_year();
        for kind in self.kinds() {
            let store = self.store(kind)?;
            if store.current_year() != year {
                return Err(SimError::invariant(format!(
                    "{kind} data is at {} but policy is at {year}",
                    store.current_year()
                )));
            }
        }
        Ok(())
    }

    /// Run every population's calculation sequence for the current year
    pub fn calc_all(&mut self) -> SimResult<()> {
        self.check_invariant()?;
        let policy = &self.policy;
        for population in [
            self.corporate.as_mut(),
            self.individual.as_mut(),
            self.consumption.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            population.store.zero_changing_calculated();
            population.pipeline.run(&mut population.store, policy)?;
        }
        self.computed = true;
        Ok(())
    }

    /// Advance every population and the policy one year, carrying corporate
    /// losses, written-down values and MAT credit forward
    pub fn increment_year(&mut self) -> SimResult<()> {
        self.check_no_snapshot("advance the year")?;
        self.check_invariant()?;
        let next = self.current_year() + 1;
        if !self.policy.contains_year(next) {
            return Err(SimError::range(format!(
                "cannot advance to {next}: policy ends in {}",
                self.policy.end_year()
            )));
        }
        for kind in self.kinds() {
            self.store(kind)?.check_advance()?;
        }
        if self.ledger().is_some() && !self.computed {
            self.calc_all()?;
        }

        // snapshot this year's closing balances
        let snapshot = match &self.corporate {
            Some(Population {
                store,
                ledger: Some(ledger),
                ..
            }) => Some(ledger.snapshot(store)),
            _ => None,
        };

        for population in [
            self.corporate.as_mut(),
            self.individual.as_mut(),
            self.consumption.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            population.store.increment_year()?;
            population.store.zero_changing_calculated();
        }
        self.policy.set_year(next)?;

        if let (Some(snapshot), Some(population)) = (snapshot, self.corporate.as_mut()) {
            if let Some(ledger) = &population.ledger {
                ledger.restore_shift(&mut population.store, snapshot)?;
            }
        }
        self.computed = false;
        log::debug!("simulation advanced to {next}");
        self.check_invariant()
    }

    /// Repeat [`Simulation::increment_year`] until `year` is reached
    pub fn advance_to_year(&mut self, year: i32) -> SimResult<()> {
        let current = self.current_year();
        if year < current {
            return Err(SimError::range(format!(
                "new year {year} is before current year {current}"
            )));
        }
        if year > self.policy.end_year() {
            return Err(SimError::range(format!(
                "new year {year} is after policy end year {}",
                self.policy.end_year()
            )));
        }
        for _ in current..year {
            self.increment_year()?;
        }
        Ok(())
    }

    /// Relabel the policy and every store as `year` without extrapolating,
    /// reweighting or moving the ledger
    pub fn set_year(&mut self, year: i32) -> SimResult<()> {
        self.check_no_snapshot("change the year")?;
        self.policy.set_year(year)?;
        for population in [
            self.corporate.as_mut(),
            self.individual.as_mut(),
            self.consumption.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            population.store.set_year(year);
        }
        self.computed = false;
        self.check_invariant()
    }

    pub fn policy_param(&self, name: &str) -> SimResult<&ParameterValue> {
        self.policy.get(name)
    }

    pub fn policy_param_at(&self, name: &str, year: i32) -> SimResult<&ParameterValue> {
        self.policy.get_at(name, year)
    }

    /// Replace a parameter's value for the current year only
    pub fn set_policy_param(&mut self, name: &str, value: ParameterValue) -> SimResult<()> {
        self.policy.set(name, value)?;
        self.computed = false;
        Ok(())
    }

    pub fn implement_reform(&mut self, reform: &Reform) -> SimResult<()> {
        self.policy.implement_reform(reform)?;
        self.computed = false;
        Ok(())
    }

    pub fn array(&self, kind: EntityKind, name: &str) -> SimResult<&[f64]> {
        self.store(kind)?.column_by_name(name)
    }

    pub fn set_array(&mut self, kind: EntityKind, name: &str, values: Vec<f64>) -> SimResult<()> {
        self.population_mut(kind)?.store.set_by_name(name, values)?;
        self.computed = false;
        Ok(())
    }

    pub fn weighted(&self, kind: EntityKind, name: &str) -> SimResult<Vec<f64>> {
        self.store(kind)?.weighted(name)
    }

    pub fn weighted_total(&self, kind: EntityKind, name: &str) -> SimResult<f64> {
        self.store(kind)?.weighted_total(name)
    }

    pub fn total_weight(&self, kind: EntityKind) -> SimResult<f64> {
        Ok(self.store(kind)?.total_weight())
    }

    pub fn table(&self, kind: EntityKind, names: &[&str]) -> SimResult<Table> {
        self.store(kind)?.table(names)
    }

    /// Save one population's state; only one snapshot may be outstanding
    pub fn store_snapshot(&mut self, kind: EntityKind) -> SimResult<()> {
        if let Some(stored) = &self.stored {
            return Err(SimError::invariant(format!(
                "a {} snapshot is already outstanding",
                stored.kind
            )));
        }
        let store = self.store(kind)?.clone();
        self.stored = Some(StoreSnapshot { kind, store });
        Ok(())
    }

    /// Put back the outstanding snapshot and clear it
    ///
    /// Other populations may have changed since the snapshot, so the
    /// simulation is left uncomputed.
    pub fn restore_snapshot(&mut self) -> SimResult<()> {
        let snapshot = self
            .stored
            .take()
            .ok_or_else(|| SimError::invariant("no snapshot to restore"))?;
        self.population_mut(snapshot.kind)?.store = snapshot.store;
        self.computed = false;
        self.check_invariant()
    }

    pub fn has_snapshot(&self) -> bool {
        self.stored.is_some()
    }

    /// Weighted totals of `columns` for `num_years` years from the current one
    ///
    /// Runs on a copy; this simulation is not changed.
    pub fn multi_year_totals(
        &self,
        num_years: usize,
        columns: &[(EntityKind, &str)],
    ) -> SimResult<Vec<YearTotals>> {
        if num_years == 0 {
            return Err(SimError::range("multi-year totals need at least one year"));
        }
        let last = self.current_year() + num_years as i32 - 1;
        if last > self.policy.end_year() {
            return Err(SimError::range(format!(
                "{num_years} years from {} run past policy end year {}",
                self.current_year(),
                self.policy.end_year()
            )));
        }

        let mut sim = self.clone();
        sim.stored = None;
        let mut years = Vec::with_capacity(num_years);
        for step in 0..num_years {
            if step > 0 {
                sim.increment_year()?;
            }
            sim.calc_all()?;
            let mut totals = BTreeMap::new();
            for (kind, column) in columns {
                totals.insert(format!("{kind}.{column}"), sim.weighted_total(*kind, column)?);
            }
            years.push(YearTotals {
                year: sim.current_year(),
                totals,
            });
        }
        Ok(years)
    }
}
