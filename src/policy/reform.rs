//! Policy reform provisions and their JSON text form
//!
//! Reform text is JSON with `//` comments allowed and a single top-level
//! `policy` key. Provisions may be written year-major
//! (`{"2021": {"param": value}}`) or parameter-major
//! (`{"param": {"2021": value}}`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{SimError, SimResult};

const REQUIRED_KEYS: [&str; 1] = ["policy"];

/// Blank out `//` comments without changing line numbers
fn strip_comments(text: &str) -> SimResult<String> {
    let pattern = Regex::new(r"//.*")
        .map_err(|e| SimError::config(format!("invalid comment pattern: {e}")))?;
    Ok(pattern.replace_all(text, " ").into_owned())
}

/// Provisions keyed by year, then by parameter name as written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reform {
    provisions: BTreeMap<i32, BTreeMap<String, Value>>,
}

impl Reform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, year: i32, name: impl Into<String>, value: Value) {
        self.provisions.entry(year).or_default().insert(name.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.provisions.values().all(BTreeMap::is_empty)
    }

    pub fn first_year(&self) -> Option<i32> {
        self.provisions.keys().next().copied()
    }

    pub fn last_year(&self) -> Option<i32> {
        self.provisions.keys().next_back().copied()
    }

    /// Years in ascending order with their provisions
    pub fn iter(&self) -> impl Iterator<Item = (i32, &BTreeMap<String, Value>)> {
        self.provisions.iter().map(|(year, p)| (*year, p))
    }

    pub fn from_path(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_text(&text)
    }

    pub fn from_json_text(text: &str) -> SimResult<Self> {
        let json = strip_comments(text)?;
        let raw: Value = serde_json::from_str(&json).map_err(|e| invalid_json(&json, &e))?;

        let Value::Object(top) = raw else {
            return Err(SimError::schema("policy reform text is not a JSON object"));
        };
        let actual: BTreeSet<&str> = top.keys().map(String::as_str).collect();
        let missing: Vec<&str> = REQUIRED_KEYS.iter().copied().filter(|k| !actual.contains(k)).collect();
        if !missing.is_empty() {
            return Err(SimError::schema(format!(
                "required key(s) {} missing from policy reform file",
                missing.join(", ")
            )));
        }
        let illegal: Vec<&str> = actual
            .iter()
            .copied()
            .filter(|k| !REQUIRED_KEYS.contains(k))
            .collect();
        if !illegal.is_empty() {
            return Err(SimError::schema(format!(
                "illegal key(s) {} in policy reform file",
                illegal.join(", ")
            )));
        }

        let Some(Value::Object(policy)) = top.get("policy") else {
            return Err(SimError::schema("policy reform 'policy' value is not an object"));
        };
        Self::from_policy_object(policy)
    }

    fn from_policy_object(policy: &Map<String, Value>) -> SimResult<Self> {
        let mut reform = Reform::new();
        if policy.is_empty() {
            return Ok(reform);
        }
        let year_keys = policy.keys().filter(|k| parse_year(k).is_some()).count();
        if year_keys == policy.len() {
            for (year_key, params) in policy {
                let year = parse_year(year_key).unwrap_or_default();
                for (name, value) in as_object(params, year_key)? {
                    reform.insert(year, name.clone(), value.clone());
                }
            }
        } else if year_keys == 0 {
            for (name, by_year) in policy {
                for (year_key, value) in as_object(by_year, name)? {
                    let year = parse_year(year_key).ok_or_else(|| {
                        SimError::schema(format!("{name} key {year_key} is not a year"))
                    })?;
                    reform.insert(year, name.clone(), value.clone());
                }
            }
        } else {
            return Err(SimError::schema(
                "policy reform mixes year keys and parameter keys at the same level",
            ));
        }
        Ok(reform)
    }
}

fn parse_year(key: &str) -> Option<i32> {
    key.trim().parse().ok()
}

fn as_object<'a>(value: &'a Value, key: &str) -> SimResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SimError::schema(format!("reform entry {key} is not paired with an object")))
}

fn invalid_json(text: &str, err: &serde_json::Error) -> SimError {
    let border = "XX----.----1----.----2----.----3----.----4----.----5----.----6----.----7";
    let mut msg = format!(
        "policy reform text below contains invalid JSON:\n{err} (line {}, column {})\n",
        err.line(),
        err.column()
    );
    msg.push_str("The invalid JSON reform text is between the lines:\n");
    msg.push_str(border);
    msg.push('\n');
    for (n, line) in text.split('\n').enumerate() {
        msg.push_str(&format!("{:02}{line}\n", n + 1));
    }
    msg.push_str(border);
    SimError::schema(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;

    #[test]
    fn test_year_major_reform() {
        let reform = Reform::from_json_text(r#"{"policy":{"2021":{"param_x":99}}}"#).unwrap();
        assert_eq!(reform.first_year(), Some(2021));
        let (year, provisions) = reform.iter().next().unwrap();
        assert_eq!(year, 2021);
        assert_eq!(provisions["param_x"], json!(99));
    }

    #[test]
    fn test_param_major_reform_with_comments() {
        let text = r#"
        // raise the standard deduction
        {
            "policy": {
                "std_deduction": {"2020": [60000], "2022": [75000]}, // two steps
                "rate4": {"2020": [0.25]}
            }
        }"#;
        let reform = Reform::from_json_text(text).unwrap();
        assert_eq!(reform.first_year(), Some(2020));
        assert_eq!(reform.last_year(), Some(2022));
        let years: Vec<i32> = reform.iter().map(|(y, _)| y).collect();
        assert_eq!(years, vec![2020, 2022]);
        let (_, first) = reform.iter().next().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first["rate4"], json!([0.25]));
    }

    #[test]
    fn test_missing_and_illegal_keys() {
        let err = Reform::from_json_text(r#"{"reform": {}}"#).unwrap_err();
        assert!(err.to_string().contains("required key(s) policy missing"));
        let err = Reform::from_json_text(r#"{"policy": {}, "behavior": {}}"#).unwrap_err();
        assert!(err.to_string().contains("illegal key(s) behavior"));
    }

    #[test]
    fn test_invalid_json_lists_lines() {
        let text = "{\n  \"policy\": {\n    \"rate1\": {\"2020\": 0.1,}\n  }\n}";
        let err = Reform::from_json_text(text).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::SchemaViolation);
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("03    \"rate1\""));
        assert!(msg.contains("XX----.----1"));
    }

    #[test]
    fn test_mixed_layout_rejected() {
        let err = Reform::from_json_text(r#"{"policy": {"2020": {}, "rate1": {}}}"#).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::SchemaViolation);
    }

    #[test]
    fn test_empty_policy() {
        let reform = Reform::from_json_text(r#"{"policy": {}}"#).unwrap();
        assert!(reform.is_empty());
        assert_eq!(reform.first_year(), None);
    }
}
