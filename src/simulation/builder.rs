use super::engine::{Population, Simulation};
use crate::error::{SimError, SimResult};
use crate::policy::PolicyParameterStore;
use crate::records::{EntityKind, EntityStore};

/// Assembles a [`Simulation`] from a policy and up to three populations
///
/// Inputs are moved in; clone them first to reuse them elsewhere.
pub struct SimulationBuilder {
    policy: PolicyParameterStore,
    individual: Option<EntityStore>,
    corporate: Option<EntityStore>,
    consumption: Option<EntityStore>,
}

impl SimulationBuilder {
    pub fn new(policy: PolicyParameterStore) -> Self {
        Self {
            policy,
            individual: None,
            corporate: None,
            consumption: None,
        }
    }

    pub fn individual(mut self, store: EntityStore) -> Self {
        self.individual = Some(store);
        self
    }

    pub fn corporate(mut self, store: EntityStore) -> Self {
        self.corporate = Some(store);
        self
    }

    pub fn consumption(mut self, store: EntityStore) -> Self {
        self.consumption = Some(store);
        self
    }

    /// Validate the inputs and line up the policy and data years
    ///
    /// A policy ahead of the data pulls the data forward through the normal
    /// year advance; a policy behind the data is moved to the data year.
    pub fn build(self) -> SimResult<Simulation> {
        let mut policy = self.policy;
        let slots = [
            (EntityKind::Individual, self.individual),
            (EntityKind::Corporate, self.corporate),
            (EntityKind::Consumption, self.consumption),
        ];

        let mut data_year: Option<i32> = None;
        for (kind, store) in &slots {
            let Some(store) = store else { continue };
            if store.entity() != *kind {
                return Err(SimError::config(format!(
                    "{} data passed where {kind} data is expected",
                    store.entity()
                )));
            }
            match data_year {
                Some(year) if year != store.current_year() => {
                    return Err(SimError::config(format!(
                        "{kind} data is at {} but other data is at {year}",
                        store.current_year()
                    )));
                }
                _ => data_year = Some(store.current_year()),
            }
        }
        let data_year = data_year
            .ok_or_else(|| SimError::config("a simulation needs at least one population"))?;
        if !policy.contains_year(data_year) {
            return Err(SimError::range(format!(
                "data year {data_year} is outside policy years {}-{}",
                policy.start_year(),
                policy.end_year()
            )));
        }

        let target = policy.current_year().max(data_year);
        policy.set_year(data_year)?;

        let [(_, individual), (_, corporate), (_, consumption)] = slots;
        let mut sim = Simulation {
            policy,
            individual: individual.map(Population::new).transpose()?,
            corporate: corporate.map(Population::new).transpose()?,
            consumption: consumption.map(Population::new).transpose()?,
            stored: None,
            computed: false,
        };
        if target > data_year {
            log::info!("extrapolating data from {data_year} to policy year {target}");
            sim.advance_to_year(target)?;
        }
        Ok(sim)
    }
}
