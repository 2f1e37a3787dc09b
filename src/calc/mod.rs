//! Tax calculation stages
//!
//! Each stage declares the columns it reads and writes. A [`Pipeline`]
//! binds an ordered list of stages to a schema once, checking that every
//! read is available by the time the stage runs and that every write is a
//! calculated column. At run time [`StageContext`] only hands out the
//! columns a stage declared.

pub mod consumption;
pub mod corporate;
pub mod individual;

use std::collections::HashMap;

use rayon::prelude::*;

use crate::error::{SimError, SimResult};
use crate::policy::PolicyParameterStore;
use crate::records::{ColumnId, ColumnRole, EntityKind, EntityStore, Schema};

/// One step of a tax calculation over a whole population
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn reads(&self) -> Vec<String>;

    fn writes(&self) -> Vec<String>;

    fn run(&self, ctx: &mut StageContext<'_>) -> SimResult<()>;
}

type StageFn = fn(&mut StageContext<'_>) -> SimResult<()>;

/// Stage backed by a plain function
pub struct FnStage {
    name: String,
    reads: Vec<String>,
    writes: Vec<String>,
    func: StageFn,
}

impl FnStage {
    pub fn new(name: impl Into<String>, reads: Vec<String>, writes: Vec<String>, func: StageFn) -> Self {
        Self {
            name: name.into(),
            reads,
            writes,
            func,
        }
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        self.reads.clone()
    }

    fn writes(&self) -> Vec<String> {
        self.writes.clone()
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> SimResult<()> {
        (self.func)(ctx)
    }
}

pub(crate) fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Row-wise transform of one column into another
pub(crate) fn map_column<F>(ctx: &mut StageContext<'_>, input: &str, output: &str, f: F) -> SimResult<()>
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    let out: Vec<f64> = ctx.column(input)?.par_iter().map(|&x| f(x)).collect();
    ctx.write(output, out)
}

/// Row-wise sum of several columns
pub(crate) fn sum_columns<S: AsRef<str>>(ctx: &StageContext<'_>, inputs: &[S]) -> SimResult<Vec<f64>> {
    let cols = ctx.columns(inputs)?;
    Ok((0..ctx.rows())
        .into_par_iter()
        .map(|i| cols.iter().map(|c| c[i]).sum())
        .collect())
}

/// Vector parameter with a known number of elements
pub(crate) fn policy_array<const N: usize>(policy: &PolicyParameterStore, name: &str) -> SimResult<[f64; N]> {
    let values = policy.vector(name)?;
    values.try_into().map_err(|_| {
        SimError::schema(format!("policy parameter {name} needs {N} values, has {}", values.len()))
    })
}

/// Access granted to a running stage
pub struct StageContext<'a> {
    stage: &'a str,
    store: &'a mut EntityStore,
    policy: &'a PolicyParameterStore,
    reads: &'a HashMap<String, ColumnId>,
    writes: &'a HashMap<String, ColumnId>,
}

impl<'a> StageContext<'a> {
    pub fn policy(&self) -> &PolicyParameterStore {
        self.policy
    }

    pub fn rows(&self) -> usize {
        self.store.rows()
    }

    pub fn year(&self) -> i32 {
        self.store.current_year()
    }

    /// A declared input column
    pub fn column(&self, name: &str) -> SimResult<&[f64]> {
        match self.reads.get(name) {
            Some(id) => Ok(self.store.column(*id)),
            None => Err(SimError::config(format!(
                "stage {} reads undeclared column {name}",
                self.stage
            ))),
        }
    }

    /// Several declared input columns at once, in the order given
    pub fn columns<S: AsRef<str>>(&self, names: &[S]) -> SimResult<Vec<&[f64]>> {
        names.iter().map(|n| self.column(n.as_ref())).collect()
    }

    /// Replace a declared output column
    pub fn write(&mut self, name: &str, values: Vec<f64>) -> SimResult<()> {
        match self.writes.get(name) {
            Some(id) => self.store.set(*id, values),
            None => Err(SimError::config(format!(
                "stage {} writes undeclared column {name}",
                self.stage
            ))),
        }
    }
}

struct BoundStage {
    stage: Box<dyn Stage>,
    reads: HashMap<String, ColumnId>,
    writes: HashMap<String, ColumnId>,
}

/// Ordered stages bound to one schema
pub struct Pipeline {
    entity: EntityKind,
    stages: Vec<BoundStage>,
}

impl Pipeline {
    /// Validate stage contracts against a schema, in order
    pub fn bind(schema: &Schema, stages: Vec<Box<dyn Stage>>) -> SimResult<Self> {
        let mut produced: Vec<ColumnId> = Vec::new();
        let mut bound = Vec::with_capacity(stages.len());
        for stage in stages {
            let mut writes = HashMap::new();
            for name in stage.writes() {
                let id = resolve(schema, stage.name(), &name)?;
                if !schema.spec(id).is_calculated() {
                    return Err(SimError::config(format!(
                        "stage {} writes {name}, which is not a calculated column",
                        stage.name()
                    )));
                }
                writes.insert(name, id);
            }

            let mut reads = HashMap::new();
            for name in stage.reads() {
                let id = resolve(schema, stage.name(), &name)?;
                let available = match schema.spec(id).role {
                    ColumnRole::Read { .. } | ColumnRole::Ledger | ColumnRole::Year => true,
                    ColumnRole::Calculated { changing } => !changing || produced.contains(&id),
                };
                if !available {
                    return Err(SimError::config(format!(
                        "stage {} reads {name} before any earlier stage writes it",
                        stage.name()
                    )));
                }
                reads.insert(name, id);
            }

            produced.extend(writes.values().copied());
            bound.push(BoundStage {
                stage,
                reads,
                writes,
            });
        }
        Ok(Self {
            entity: schema.entity(),
            stages: bound,
        })
    }

    /// Standard calculation sequence for a population
    pub fn standard(schema: &Schema) -> SimResult<Self> {
        let stages = match schema.entity() {
            EntityKind::Individual => individual::stages(),
            EntityKind::Corporate => corporate::stages(),
            EntityKind::Consumption => consumption::stages(),
        };
        Self::bind(schema, stages)
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|b| b.stage.name())
    }

    pub fn run(&self, store: &mut EntityStore, policy: &PolicyParameterStore) -> SimResult<()> {
        if store.entity() != self.entity {
            return Err(SimError::config(format!(
                "{} pipeline cannot run on {} data",
                self.entity,
                store.entity()
            )));
        }
        for bound in &self.stages {
            log::debug!("{} {}: {}", self.entity, store.current_year(), bound.stage.name());
            let mut ctx = StageContext {
                stage: bound.stage.name(),
                store: &mut *store,
                policy,
                reads: &bound.reads,
                writes: &bound.writes,
            };
            bound.stage.run(&mut ctx)?;
        }
        Ok(())
    }
}

fn resolve(schema: &Schema, stage: &str, name: &str) -> SimResult<ColumnId> {
    schema.id(name).ok_or_else(|| {
        SimError::config(format!(
            "stage {stage} uses {name}, which is not in the {} schema",
            schema.entity()
        ))
    })
}
