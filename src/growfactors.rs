//! Year-indexed growth factors used to extrapolate input data
//!
//! Loaded from CSV with a `YEAR` column and one column per factor. Factor
//! names are drawn from a fixed whitelist so a typo in the data file fails at
//! load time instead of silently leaving a variable unextrapolated.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::{SimError, SimResult};

const DEFAULT_GROWFACTORS: &str = include_str!("../data/growfactors.csv");

/// Factor names a growth table may carry
pub const VALID_NAMES: &[&str] = &[
    "CPI",
    "SALARY",
    "RENT",
    "BP_NONSPECULATIVE",
    "BP_SPECULATIVE",
    "BP_SPECIFIED",
    "BP_PATENT115BBF",
    "STCG_APPRATE",
    "OINCOME",
    "DEDUCTIONS",
    "DEDU_SEC_10A_OR_10AA",
    "ST_CG_AMT_1",
    "ST_CG_AMT_2",
    "LT_CG_AMT_1",
    "LT_CG_AMT_2",
    "LOSSES_CY",
    "LOSSES_BF",
    "AGRI_INCOME",
    "CORP_PROFIT",
    "INVESTMENT",
    "BOOK_PROFIT",
    "CONSUMPTION",
    "OTHER_CONS_ITEM",
];

pub fn is_valid_name(name: &str) -> bool {
    VALID_NAMES.contains(&name)
}

/// Immutable table of growth factors over a contiguous year range
#[derive(Debug, Clone)]
pub struct GrowthFactorTable {
    first_year: i32,
    last_year: i32,
    factors: BTreeMap<String, Vec<f64>>,
}

impl GrowthFactorTable {
    pub fn from_reader<R: io::Read>(reader: R) -> SimResult<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let year_col = headers
            .iter()
            .position(|h| h == "YEAR")
            .ok_or_else(|| SimError::schema("growth factor table has no YEAR column"))?;

        let invalid: Vec<&str> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != year_col && !is_valid_name(h))
            .map(|(_, h)| h.as_str())
            .collect();
        if !invalid.is_empty() {
            return Err(SimError::schema(format!(
                "invalid growth factor names: {}",
                invalid.join(", ")
            )));
        }

        let mut years: Vec<i32> = Vec::new();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
        for result in reader.records() {
            let record = result?;
            for (i, cell) in record.iter().enumerate() {
                if i == year_col {
                    let year: i32 = cell.parse().map_err(|_| {
                        SimError::schema(format!("growth factor YEAR '{cell}' is not an integer"))
                    })?;
                    years.push(year);
                } else {
                    let value: f64 = cell.parse().map_err(|_| {
                        SimError::schema(format!(
                            "growth factor {} value '{cell}' is not a number",
                            headers[i]
                        ))
                    })?;
                    columns[i].push(value);
                }
            }
        }

        let first_year = *years
            .first()
            .ok_or_else(|| SimError::schema("growth factor table has no rows"))?;
        for (offset, year) in years.iter().enumerate() {
            if *year != first_year + offset as i32 {
                return Err(SimError::schema(format!(
                    "growth factor years are not contiguous at {year}"
                )));
            }
        }
        let last_year = first_year + years.len() as i32 - 1;

        let factors = headers
            .into_iter()
            .zip(columns)
            .enumerate()
            .filter(|(i, _)| *i != year_col)
            .map(|(_, pair)| pair)
            .collect();

        log::debug!("loaded growth factors for {first_year}-{last_year}");
        Ok(Self {
            first_year,
            last_year,
            factors,
        })
    }

    pub fn from_path(path: &Path) -> SimResult<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Embedded default table
    pub fn builtin() -> SimResult<Self> {
        Self::from_reader(DEFAULT_GROWFACTORS.as_bytes())
    }

    pub fn first_year(&self) -> i32 {
        self.first_year
    }

    pub fn last_year(&self) -> i32 {
        self.last_year
    }

    pub fn contains_year(&self, year: i32) -> bool {
        (self.first_year..=self.last_year).contains(&year)
    }

    pub fn has_factor(&self, name: &str) -> bool {
        self.factors.contains_key(name)
    }

    pub fn factor_names(&self) -> impl Iterator<Item = &str> {
        self.factors.keys().map(String::as_str)
    }

    /// Factor for `name` in `year`
    pub fn factor_value(&self, name: &str, year: i32) -> SimResult<f64> {
        if !is_valid_name(name) {
            return Err(SimError::range(format!("{name} is not a valid growth factor name")));
        }
        self.check_year(year)?;
        let column = self
            .factors
            .get(name)
            .ok_or_else(|| SimError::schema(format!("growth factor table has no {name} column")))?;
        Ok(column[(year - self.first_year) as usize])
    }

    /// Growth rates `factor - 1` rounded to four decimals, for `first..=last`
    pub fn rate(&self, name: &str, first: i32, last: i32) -> SimResult<Vec<f64>> {
        if first > last {
            return Err(SimError::range(format!(
                "first year {first} is after last year {last}"
            )));
        }
        self.check_year(first)?;
        self.check_year(last)?;
        (first..=last)
            .map(|year| Ok(round_to(self.factor_value(name, year)? - 1.0, 4)))
            .collect()
    }

    pub fn price_inflation_rates(&self, first: i32, last: i32) -> SimResult<Vec<f64>> {
        self.rate("CPI", first, last)
    }

    pub fn wage_growth_rates(&self, first: i32, last: i32) -> SimResult<Vec<f64>> {
        self.rate("SALARY", first, last)
    }

    fn check_year(&self, year: i32) -> SimResult<()> {
        if self.contains_year(year) {
            Ok(())
        } else {
            Err(SimError::range(format!(
                "year {year} outside growth factor range {}-{}",
                self.first_year, self.last_year
            )))
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use approx::assert_relative_eq;

    const SMALL: &str = "YEAR,CPI,SALARY\n2017,1.0,1.0\n2018,1.04567,1.1\n2019,1.03,1.08\n";

    #[test]
    fn test_factor_value() {
        let gf = GrowthFactorTable::from_reader(SMALL.as_bytes()).unwrap();
        assert_eq!(gf.first_year(), 2017);
        assert_eq!(gf.last_year(), 2019);
        assert_relative_eq!(gf.factor_value("SALARY", 2018).unwrap(), 1.1);
    }

    #[test]
    fn test_factor_value_errors() {
        let gf = GrowthFactorTable::from_reader(SMALL.as_bytes()).unwrap();
        assert_eq!(gf.factor_value("BOGUS", 2018).unwrap_err().category(), ErrorCategory::Range);
        assert_eq!(gf.factor_value("CPI", 2016).unwrap_err().category(), ErrorCategory::Range);
        assert_eq!(gf.factor_value("CPI", 2020).unwrap_err().category(), ErrorCategory::Range);
        // whitelisted but not present in this table
        assert_eq!(
            gf.factor_value("RENT", 2018).unwrap_err().category(),
            ErrorCategory::SchemaViolation
        );
    }

    #[test]
    fn test_rates_rounded() {
        let gf = GrowthFactorTable::from_reader(SMALL.as_bytes()).unwrap();
        let rates = gf.price_inflation_rates(2017, 2019).unwrap();
        assert_eq!(rates.len(), 3);
        assert_relative_eq!(rates[0], 0.0);
        assert_relative_eq!(rates[1], 0.0457);
        assert_relative_eq!(rates[2], 0.03, epsilon = 1e-12);
        let wages = gf.wage_growth_rates(2019, 2019).unwrap();
        assert_relative_eq!(wages[0], 0.08, epsilon = 1e-12);
    }

    #[test]
    fn test_rate_bounds() {
        let gf = GrowthFactorTable::from_reader(SMALL.as_bytes()).unwrap();
        assert_eq!(gf.rate("CPI", 2019, 2018).unwrap_err().category(), ErrorCategory::Range);
        assert_eq!(gf.rate("CPI", 2016, 2018).unwrap_err().category(), ErrorCategory::Range);
        assert_eq!(gf.rate("CPI", 2018, 2021).unwrap_err().category(), ErrorCategory::Range);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let text = "YEAR,CPI,WIDGETS\n2017,1.0,1.0\n";
        let err = GrowthFactorTable::from_reader(text.as_bytes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::SchemaViolation);
        assert!(err.to_string().contains("WIDGETS"));
    }

    #[test]
    fn test_gap_in_years_rejected() {
        let text = "YEAR,CPI\n2017,1.0\n2019,1.0\n";
        assert!(GrowthFactorTable::from_reader(text.as_bytes()).is_err());
    }

    #[test]
    fn test_builtin_covers_policy_horizon() {
        let gf = GrowthFactorTable::builtin().unwrap();
        assert!(gf.contains_year(2017));
        assert!(gf.contains_year(2030));
        for name in VALID_NAMES {
            assert!(gf.has_factor(name), "builtin table lacks {name}");
        }
    }
}
