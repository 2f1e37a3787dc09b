//! Year-indexed policy parameters
//!
//! Every parameter holds one value per assessment year over
//! `start_year..=end_year`. Years without an explicit value carry the prior
//! year forward, inflated by the price index when the parameter is indexed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::reform::Reform;
use crate::error::{SimError, SimResult};
use crate::growfactors::{round_to, GrowthFactorTable};

const CURRENT_LAW_POLICY: &str = include_str!("../../data/current_law_policy.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Real,
    Integer,
    Boolean,
}

/// Value of one parameter in one year
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Real(f64),
    Integer(i64),
    Boolean(bool),
    /// One element per label in the parameter's `col_label`
    Vector(Vec<f64>),
}

impl ParameterValue {
    pub fn as_real(&self) -> Option<f64> {
        match self {
            ParameterValue::Real(x) => Some(*x),
            ParameterValue::Integer(i) => Some(*i as f64),
            ParameterValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParameterValue::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            ParameterValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Boolean(b) => Some(*b),
            ParameterValue::Real(x) => Some(*x != 0.0),
            ParameterValue::Integer(i) => Some(*i != 0),
            ParameterValue::Vector(_) => None,
        }
    }

    fn numbers(&self) -> Vec<f64> {
        match self {
            ParameterValue::Real(x) => vec![*x],
            ParameterValue::Integer(i) => vec![*i as f64],
            ParameterValue::Boolean(_) => Vec::new(),
            ParameterValue::Vector(v) => v.clone(),
        }
    }

    fn inflated(&self, rate: f64) -> ParameterValue {
        match self {
            ParameterValue::Real(x) => ParameterValue::Real(round_to(x * (1.0 + rate), 2)),
            ParameterValue::Vector(v) => {
                ParameterValue::Vector(v.iter().map(|x| round_to(x * (1.0 + rate), 2)).collect())
            }
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ValueRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// What to do when a reform sets a value outside its range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeAction {
    #[default]
    Stop,
    Warn,
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub long_name: String,
    pub value_type: ValueType,
    /// Element labels; empty for scalar parameters
    pub col_label: Vec<String>,
    pub indexed: bool,
    pub range: ValueRange,
    pub out_of_range_action: RangeAction,
}

impl ParameterSpec {
    pub fn is_vector(&self) -> bool {
        !self.col_label.is_empty()
    }

    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.col_label.iter().position(|l| l == label)
    }

    /// Interpret a JSON value, accepting scalars bare or as a one-element list
    fn value_from_json(&self, value: &Value, context: &str) -> SimResult<ParameterValue> {
        let value = match value {
            Value::Array(items) if items.len() == 1 && (!self.is_vector() || items[0].is_array()) => {
                &items[0]
            }
            other => other,
        };
        if self.is_vector() {
            let items = value.as_array().ok_or_else(|| {
                SimError::schema(format!("{context} {} expects a list of values", self.name))
            })?;
            if items.len() != self.col_label.len() {
                return Err(SimError::schema(format!(
                    "{context} {} expects {} values, got {}",
                    self.name,
                    self.col_label.len(),
                    items.len()
                )));
            }
            let values = items
                .iter()
                .map(|item| number(item, &self.name, context))
                .collect::<SimResult<Vec<_>>>()?;
            return Ok(ParameterValue::Vector(values));
        }
        match self.value_type {
            ValueType::Real => Ok(ParameterValue::Real(number(value, &self.name, context)?)),
            ValueType::Integer => {
                let x = number(value, &self.name, context)?;
                if x.fract() != 0.0 {
                    return Err(SimError::schema(format!(
                        "{context} {} value {x} is not an integer",
                        self.name
                    )));
                }
                Ok(ParameterValue::Integer(x as i64))
            }
            ValueType::Boolean => Ok(ParameterValue::Boolean(truthy(value))),
        }
    }

    /// Coerce a caller-supplied value to this parameter's shape
    fn conform(&self, value: ParameterValue) -> SimResult<ParameterValue> {
        use ParameterValue::*;
        let shaped = match (self.is_vector(), self.value_type, value) {
            (true, _, Vector(v)) if v.len() == self.col_label.len() => Some(Vector(v)),
            (false, ValueType::Real, Real(x)) => Some(Real(x)),
            (false, ValueType::Real, Integer(i)) => Some(Real(i as f64)),
            (false, ValueType::Integer, Integer(i)) => Some(Integer(i)),
            (false, ValueType::Integer, Real(x)) if x.fract() == 0.0 => Some(Integer(x as i64)),
            (false, ValueType::Boolean, v @ (Boolean(_) | Real(_) | Integer(_))) => v.as_bool().map(Boolean),
            _ => None,
        };
        shaped.ok_or_else(|| {
            SimError::schema(format!("value does not fit the shape of parameter {}", self.name))
        })
    }
}

fn number(value: &Value, name: &str, context: &str) -> SimResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| SimError::schema(format!("{context} {name} value {value} is not a number")))
}

/// JSON truthiness used for boolean parameters
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    #[serde(default)]
    long_name: String,
    value_type: ValueType,
    #[serde(default)]
    col_label: Vec<String>,
    #[serde(default)]
    indexed: bool,
    #[serde(default)]
    range: ValueRange,
    #[serde(default)]
    out_of_range_action: RangeAction,
    value_yrs: Vec<i32>,
    value: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    start_year: i32,
    end_year: i32,
    parameters: BTreeMap<String, RawParameter>,
}

/// Where a reform key lands once translated
enum Target {
    Whole(String),
    Element(String, usize),
    Indexing(String),
}

#[derive(Debug, Clone)]
pub struct PolicyParameterStore {
    start_year: i32,
    end_year: i32,
    current_year: i32,
    specs: BTreeMap<String, ParameterSpec>,
    values: BTreeMap<String, Vec<ParameterValue>>,
    indexed: BTreeMap<String, Vec<bool>>,
    inflation_rates: Vec<f64>,
    warnings: Vec<String>,
}

impl PolicyParameterStore {
    /// Load a parameter file; indexed parameters grow with the table's CPI
    pub fn from_json_str(text: &str, growth: Option<&GrowthFactorTable>) -> SimResult<Self> {
        let raw: RawPolicy = serde_json::from_str(text)
            .map_err(|e| SimError::schema(format!("invalid policy parameter file: {e}")))?;
        if raw.start_year > raw.end_year {
            return Err(SimError::schema(format!(
                "policy start year {} is after end year {}",
                raw.start_year, raw.end_year
            )));
        }
        let num_years = (raw.end_year - raw.start_year + 1) as usize;
        let inflation_rates = match growth {
            Some(table) => table.price_inflation_rates(raw.start_year, raw.end_year)?,
            None => vec![0.0; num_years],
        };

        let mut store = Self {
            start_year: raw.start_year,
            end_year: raw.end_year,
            current_year: raw.start_year,
            specs: BTreeMap::new(),
            values: BTreeMap::new(),
            indexed: BTreeMap::new(),
            inflation_rates,
            warnings: Vec::new(),
        };

        for (name, param) in raw.parameters {
            let spec = ParameterSpec {
                name: name.clone(),
                long_name: param.long_name,
                value_type: param.value_type,
                col_label: param.col_label,
                indexed: param.indexed,
                range: param.range,
                out_of_range_action: param.out_of_range_action,
            };
            if spec.indexed && spec.value_type != ValueType::Real {
                return Err(SimError::schema(format!("parameter {name} cannot be indexed")));
            }
            if param.value_yrs.len() != param.value.len() {
                return Err(SimError::schema(format!(
                    "parameter {name} has {} years but {} values",
                    param.value_yrs.len(),
                    param.value.len()
                )));
            }
            if param.value_yrs.first() != Some(&raw.start_year) {
                return Err(SimError::schema(format!(
                    "parameter {name} has no value for {}",
                    raw.start_year
                )));
            }
            if param.value_yrs.windows(2).any(|w| w[0] >= w[1]) {
                return Err(SimError::schema(format!("parameter {name} years are not ascending")));
            }

            let mut explicit = BTreeMap::new();
            for (year, value) in param.value_yrs.iter().zip(&param.value) {
                if *year > raw.end_year {
                    return Err(SimError::schema(format!(
                        "parameter {name} has a value for {year} after end year {}",
                        raw.end_year
                    )));
                }
                let value = spec.value_from_json(value, &format!("{year}"))?;
                check_range(&spec, *year, &value)?;
                explicit.insert(*year, value);
            }

            let mut series: Vec<ParameterValue> = Vec::with_capacity(num_years);
            for (offset, year) in (raw.start_year..=raw.end_year).enumerate() {
                let value = match (explicit.remove(&year), series.last()) {
                    (Some(v), _) => v,
                    (None, Some(prev)) if spec.indexed => prev.inflated(store.inflation_rates[offset]),
                    (None, Some(prev)) => prev.clone(),
                    (None, None) => {
                        return Err(SimError::schema(format!("parameter {name} has no values")))
                    }
                };
                series.push(value);
            }

            store.indexed.insert(name.clone(), vec![spec.indexed; num_years]);
            store.values.insert(name.clone(), series);
            store.specs.insert(name, spec);
        }

        log::debug!(
            "loaded {} policy parameters for {}-{}",
            store.specs.len(),
            store.start_year,
            store.end_year
        );
        Ok(store)
    }

    pub fn from_path(path: &Path, growth: Option<&GrowthFactorTable>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text, growth)
    }

    /// Embedded current-law parameters, indexed with the given growth factors
    pub fn current_law_with(growth: &GrowthFactorTable) -> SimResult<Self> {
        Self::from_json_str(CURRENT_LAW_POLICY, Some(growth))
    }

    /// Embedded current-law parameters with the embedded growth factors
    pub fn current_law() -> SimResult<Self> {
        Self::current_law_with(&GrowthFactorTable::builtin()?)
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn num_years(&self) -> usize {
        (self.end_year - self.start_year + 1) as usize
    }

    pub fn contains_year(&self, year: i32) -> bool {
        (self.start_year..=self.end_year).contains(&year)
    }

    pub fn set_year(&mut self, year: i32) -> SimResult<()> {
        if !self.contains_year(year) {
            return Err(SimError::range(format!(
                "policy year {year} outside {}-{}",
                self.start_year, self.end_year
            )));
        }
        self.current_year = year;
        Ok(())
    }

    pub fn specs(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.specs.values()
    }

    pub fn spec(&self, name: &str) -> SimResult<&ParameterSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| SimError::schema(format!("unknown policy parameter {name}")))
    }

    /// Warnings raised by the last reform for out-of-range values marked `warn`
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Price inflation rate applied when extrapolating into each year
    pub fn inflation_rates(&self) -> &[f64] {
        &self.inflation_rates
    }

    pub fn is_indexed(&self, name: &str, year: i32) -> SimResult<bool> {
        let offset = self.offset(year)?;
        self.indexed
            .get(name)
            .map(|flags| flags[offset])
            .ok_or_else(|| SimError::schema(format!("unknown policy parameter {name}")))
    }

    pub fn get(&self, name: &str) -> SimResult<&ParameterValue> {
        self.get_at(name, self.current_year)
    }

    pub fn get_at(&self, name: &str, year: i32) -> SimResult<&ParameterValue> {
        let offset = self.offset(year)?;
        self.values
            .get(name)
            .map(|series| &series[offset])
            .ok_or_else(|| SimError::schema(format!("unknown policy parameter {name}")))
    }

    pub fn real(&self, name: &str) -> SimResult<f64> {
        self.get(name)?
            .as_real()
            .ok_or_else(|| SimError::schema(format!("policy parameter {name} is not a scalar")))
    }

    pub fn vector(&self, name: &str) -> SimResult<&[f64]> {
        self.get(name)?
            .as_vector()
            .ok_or_else(|| SimError::schema(format!("policy parameter {name} is not a vector")))
    }

    pub fn flag(&self, name: &str) -> SimResult<bool> {
        self.get(name)?
            .as_bool()
            .ok_or_else(|| SimError::schema(format!("policy parameter {name} is not a flag")))
    }

    /// Replace the current year's value only
    pub fn set(&mut self, name: &str, value: ParameterValue) -> SimResult<()> {
        self.set_at(name, self.current_year, value)
    }

    /// Replace one year's value only; later years are left as they are
    pub fn set_at(&mut self, name: &str, year: i32, value: ParameterValue) -> SimResult<()> {
        let offset = self.offset(year)?;
        let value = self.spec(name)?.conform(value)?;
        self.series_mut(name)?[offset] = value;
        Ok(())
    }

    /// Apply a multi-year reform without moving the current year
    ///
    /// A value set for year Y holds for all later years until the next
    /// provision for the same parameter. Nothing changes if any provision
    /// fails validation.
    pub fn implement_reform(&mut self, reform: &Reform) -> SimResult<()> {
        let (Some(first), Some(last)) = (reform.first_year(), reform.last_year()) else {
            return Ok(());
        };
        if first < self.start_year {
            return Err(SimError::range(format!(
                "{first} reform provision is before start year {}",
                self.start_year
            )));
        }
        if first < self.current_year {
            return Err(SimError::range(format!(
                "{first} reform provision is before current year {}",
                self.current_year
            )));
        }
        if last > self.end_year {
            return Err(SimError::range(format!(
                "{last} reform provision is after end year {}",
                self.end_year
            )));
        }

        let mut next = self.clone();
        next.warnings.clear();
        for (year, provisions) in reform.iter() {
            next.apply_provisions(year, provisions)?;
        }
        for warning in &next.warnings {
            log::warn!("{warning}");
        }
        *self = next;
        Ok(())
    }

    fn apply_provisions(&mut self, year: i32, provisions: &BTreeMap<String, Value>) -> SimResult<()> {
        let offset = self.offset(year)?;
        let mut whole: BTreeMap<String, ParameterValue> = BTreeMap::new();
        let mut elements: BTreeMap<String, Vec<(usize, f64)>> = BTreeMap::new();
        let mut indexing: BTreeMap<String, bool> = BTreeMap::new();

        let context = year.to_string();
        for (key, value) in provisions {
            match self.resolve(key)? {
                Target::Whole(name) => {
                    let parsed = self.spec(&name)?.value_from_json(value, &context)?;
                    whole.insert(name, parsed);
                }
                Target::Element(name, idx) => {
                    let scalar = match value {
                        Value::Array(items) if items.len() == 1 => &items[0],
                        other => other,
                    };
                    let x = number(scalar, key, &context)?;
                    elements.entry(name).or_default().push((idx, x));
                }
                Target::Indexing(name) => {
                    indexing.insert(name, truthy(value));
                }
            }
        }

        for (name, flag) in indexing {
            if self.spec(&name)?.value_type != ValueType::Real {
                return Err(SimError::schema(format!("parameter {name} cannot be indexed")));
            }
            if let Some(flags) = self.indexed.get_mut(&name) {
                flags[offset..].iter_mut().for_each(|f| *f = flag);
            }
            self.recompute_after(&name, year)?;
        }

        let names: BTreeSet<String> = whole.keys().chain(elements.keys()).cloned().collect();
        for name in names {
            let mut value = match whole.remove(&name) {
                Some(v) => v,
                None => self.get_at(&name, year)?.clone(),
            };
            if let Some(updates) = elements.get(&name) {
                if let ParameterValue::Vector(items) = &mut value {
                    for (idx, x) in updates {
                        items[*idx] = *x;
                    }
                }
            }
            let spec = self.spec(&name)?;
            if let Some(warning) = check_range(spec, year, &value)? {
                self.warnings.push(warning);
            }
            self.series_mut(&name)?[offset] = value;
            self.recompute_after(&name, year)?;
        }
        Ok(())
    }

    /// Translate a reform key into the parameter it updates
    fn resolve(&self, key: &str) -> SimResult<Target> {
        if self.specs.contains_key(key) {
            return Ok(Target::Whole(key.to_string()));
        }
        if let Some(stem) = key.strip_suffix("_cpi") {
            if self.specs.contains_key(stem) {
                return Ok(Target::Indexing(stem.to_string()));
            }
        }
        if let Some((stem, index)) = key.strip_suffix(']').and_then(|k| k.rsplit_once('[')) {
            if let Some(spec) = self.specs.get(stem) {
                let idx: usize = index
                    .parse()
                    .map_err(|_| SimError::schema(format!("bad element index in {key}")))?;
                if !spec.is_vector() {
                    return Err(SimError::schema(format!("parameter {stem} is not a vector")));
                }
                if idx >= spec.col_label.len() {
                    return Err(SimError::range(format!(
                        "{key}: {stem} has {} elements",
                        spec.col_label.len()
                    )));
                }
                return Ok(Target::Element(stem.to_string(), idx));
            }
        }
        for (pos, _) in key.match_indices('_').rev() {
            let (stem, label) = (&key[..pos], &key[pos + 1..]);
            if let Some(idx) = self.specs.get(stem).and_then(|spec| spec.label_index(label)) {
                return Ok(Target::Element(stem.to_string(), idx));
            }
        }
        Err(SimError::schema(format!("unknown policy parameter {key}")))
    }

    /// Re-extrapolate every year after `year` from the value at `year`
    fn recompute_after(&mut self, name: &str, year: i32) -> SimResult<()> {
        let start = self.offset(year)?;
        let flags = self
            .indexed
            .get(name)
            .cloned()
            .ok_or_else(|| SimError::schema(format!("unknown policy parameter {name}")))?;
        let rates = self.inflation_rates.clone();
        let series = self.series_mut(name)?;
        for offset in start + 1..series.len() {
            series[offset] = if flags[offset] {
                series[offset - 1].inflated(rates[offset])
            } else {
                series[offset - 1].clone()
            };
        }
        Ok(())
    }

    fn series_mut(&mut self, name: &str) -> SimResult<&mut Vec<ParameterValue>> {
        self.values
            .get_mut(name)
            .ok_or_else(|| SimError::schema(format!("unknown policy parameter {name}")))
    }

    fn offset(&self, year: i32) -> SimResult<usize> {
        if self.contains_year(year) {
            Ok((year - self.start_year) as usize)
        } else {
            Err(SimError::range(format!(
                "year {year} outside policy range {}-{}",
                self.start_year, self.end_year
            )))
        }
    }
}

/// `Ok(Some(warning))` for out-of-range values marked `warn`
fn check_range(spec: &ParameterSpec, year: i32, value: &ParameterValue) -> SimResult<Option<String>> {
    for x in value.numbers() {
        let problem = match (spec.range.min, spec.range.max) {
            (Some(min), _) if x < min => Some(format!("{year} {} value {x} < min value {min}", spec.name)),
            (_, Some(max)) if x > max => Some(format!("{year} {} value {x} > max value {max}", spec.name)),
            _ => None,
        };
        if let Some(msg) = problem {
            return match spec.out_of_range_action {
                RangeAction::Stop => Err(SimError::schema(msg)),
                RangeAction::Warn => Ok(Some(msg)),
            };
        }
    }
    Ok(None)
}
