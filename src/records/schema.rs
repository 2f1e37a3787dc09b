//! Column schema for entity stores
//!
//! A schema is loaded once per data kind from a JSON variables file and is
//! immutable afterwards. Each column name is resolved into a [`ColumnId`]
//! handle so stages and the carryforward ledger never look columns up by
//! string on the hot path.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::growfactors;

const INDIVIDUAL_VARIABLES: &str = include_str!("../../data/records_variables.json");
const CORPORATE_VARIABLES: &str = include_str!("../../data/corprecords_variables.json");
const CONSUMPTION_VARIABLES: &str = include_str!("../../data/gstrecords_variables.json");

/// The three simulated populations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Personal income tax filers
    Individual,
    /// Corporate income tax filers
    Corporate,
    /// Consumption (GST) panel households
    Consumption,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Individual,
        EntityKind::Corporate,
        EntityKind::Consumption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Individual => "individual",
            EntityKind::Corporate => "corporate",
            EntityKind::Consumption => "consumption",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "individual" | "pit" => Ok(EntityKind::Individual),
            "corporate" | "cit" => Ok(EntityKind::Corporate),
            "consumption" | "gst" => Ok(EntityKind::Consumption),
            other => Err(SimError::config(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// Typed handle for a column within one schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(usize);

impl ColumnId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a column participates in the simulation
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRole {
    /// Input variable, extrapolated by its growth factor when one is mapped
    Read {
        required: bool,
        integer: bool,
        growth_factor: Option<String>,
        domain: Option<(f64, f64)>,
    },
    /// Carryforward state read from the data and rewritten only by the ledger shift
    Ledger,
    /// Stage output; `changing` columns are zeroed before every pass
    Calculated { changing: bool },
    /// Assessment year column, filled with the store's current year
    Year,
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub role: ColumnRole,
    pub description: String,
}

impl ColumnSpec {
    pub fn is_read(&self) -> bool {
        matches!(self.role, ColumnRole::Read { .. })
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.role, ColumnRole::Calculated { .. })
    }

    pub fn is_changing(&self) -> bool {
        matches!(self.role, ColumnRole::Calculated { changing: true })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReadType {
    Int,
    Float,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CalcType {
    Int,
    Float,
    UnchangingFloat,
}

#[derive(Debug, Deserialize)]
struct RawRead {
    #[serde(rename = "type")]
    kind: ReadType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    growth_factor: Option<String>,
    #[serde(default)]
    domain: Option<[f64; 2]>,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct RawLedger {
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct RawCalc {
    #[serde(rename = "type")]
    kind: CalcType,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    entity: EntityKind,
    year_column: String,
    read: BTreeMap<String, RawRead>,
    #[serde(default)]
    ledger: BTreeMap<String, RawLedger>,
    calc: BTreeMap<String, RawCalc>,
}

/// Immutable description of every column an entity store holds
#[derive(Debug)]
pub struct Schema {
    entity: EntityKind,
    columns: Vec<ColumnSpec>,
    index: HashMap<String, ColumnId>,
    year_column: ColumnId,
}

impl Schema {
    /// Parse a variables file
    pub fn from_json_str(text: &str) -> SimResult<Self> {
        let raw: RawSchema = serde_json::from_str(text)
            .map_err(|e| SimError::schema(format!("invalid variables file: {e}")))?;

        let mut columns = Vec::new();
        columns.push(ColumnSpec {
            name: raw.year_column.clone(),
            role: ColumnRole::Year,
            description: "assessment year".to_string(),
        });

        for (name, read) in raw.read {
            if let Some(factor) = &read.growth_factor {
                if !growfactors::is_valid_name(factor) {
                    return Err(SimError::schema(format!(
                        "{} variable {name} maps to unknown growth factor {factor}",
                        raw.entity
                    )));
                }
            }
            if let Some([lo, hi]) = read.domain {
                if lo > hi {
                    return Err(SimError::schema(format!(
                        "{name} has an empty domain [{lo}, {hi}]"
                    )));
                }
            }
            columns.push(ColumnSpec {
                name,
                role: ColumnRole::Read {
                    required: read.required,
                    integer: matches!(read.kind, ReadType::Int),
                    growth_factor: read.growth_factor,
                    domain: read.domain.map(|[lo, hi]| (lo, hi)),
                },
                description: read.desc,
            });
        }
        for (name, ledger) in raw.ledger {
            columns.push(ColumnSpec {
                name,
                role: ColumnRole::Ledger,
                description: ledger.desc,
            });
        }
        for (name, calc) in raw.calc {
            columns.push(ColumnSpec {
                name,
                role: ColumnRole::Calculated {
                    changing: matches!(calc.kind, CalcType::Float),
                },
                description: calc.desc,
            });
        }

        let mut index = HashMap::with_capacity(columns.len());
        for (i, spec) in columns.iter().enumerate() {
            if spec.name == "weight" {
                return Err(SimError::schema("'weight' is reserved for sample weights"));
            }
            if index.insert(spec.name.clone(), ColumnId(i)).is_some() {
                return Err(SimError::schema(format!(
                    "{} variable {} is declared more than once",
                    raw.entity, spec.name
                )));
            }
        }

        Ok(Self {
            entity: raw.entity,
            columns,
            index,
            year_column: ColumnId(0),
        })
    }

    /// Embedded variables file for a data kind
    pub fn builtin(kind: EntityKind) -> SimResult<Arc<Self>> {
        let text = match kind {
            EntityKind::Individual => INDIVIDUAL_VARIABLES,
            EntityKind::Corporate => CORPORATE_VARIABLES,
            EntityKind::Consumption => CONSUMPTION_VARIABLES,
        };
        let schema = Self::from_json_str(text)?;
        if schema.entity != kind {
            return Err(SimError::config(format!(
                "embedded {kind} variables file declares entity {}",
                schema.entity
            )));
        }
        Ok(Arc::new(schema))
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<ColumnId> {
        self.index.get(name).copied()
    }

    /// Resolve a column name that callers expect to exist
    pub fn require(&self, name: &str) -> SimResult<ColumnId> {
        self.id(name).ok_or_else(|| {
            SimError::schema(format!("{} schema has no column {name}", self.entity))
        })
    }

    pub fn spec(&self, id: ColumnId) -> &ColumnSpec {
        &self.columns[id.0]
    }

    pub fn name(&self, id: ColumnId) -> &str {
        &self.columns[id.0].name
    }

    pub fn year_column(&self) -> ColumnId {
        self.year_column
    }

    /// All columns paired with their handles, in declaration order
    pub fn columns(&self) -> impl Iterator<Item = (ColumnId, &ColumnSpec)> {
        self.columns.iter().enumerate().map(|(i, s)| (ColumnId(i), s))
    }

    pub fn changing_calculated(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.columns().filter(|(_, s)| s.is_changing()).map(|(id, _)| id)
    }

    /// Read columns that carry a growth factor mapping
    pub fn growth_mappings(&self) -> impl Iterator<Item = (ColumnId, &str)> {
        self.columns().filter_map(|(id, s)| match &s.role {
            ColumnRole::Read {
                growth_factor: Some(factor),
                ..
            } => Some((id, factor.as_str())),
            _ => None,
        })
    }
}
