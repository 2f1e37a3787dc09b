//! Finite-difference marginal tax rates
//!
//! A marginal rate is measured by nudging one input variable for every
//! record, recomputing, and dividing the change in liability by the nudge.
//! The population is snapshotted around the perturbed pass and a clean
//! baseline is always recomputed afterwards, so callers never observe the
//! perturbed values.

use serde::Serialize;

use super::engine::Simulation;
use crate::error::{SimError, SimResult};
use crate::records::EntityKind;

/// Variables that accept a marginal rate query, with the variables that
/// must move with them
const INDIVIDUAL_VARIABLES: &[(&str, &[&str])] = &[
    ("SALARIES", &[]),
    ("INCOME_HP", &[]),
    ("PRFT_GAIN_BP_OTHR_SPECLTV_BUS", &[]),
    ("PRFT_GAIN_BP_SPECLTV_BUS", &[]),
    ("PRFT_GAIN_BP_SPCFD_BUS", &[]),
    ("ST_CG_AMT_1", &[]),
    ("ST_CG_AMT_2", &[]),
    ("LT_CG_AMT_1", &[]),
    ("LT_CG_AMT_2", &[]),
    ("TOTAL_INCOME_OS", &[]),
];

const CORPORATE_VARIABLES: &[(&str, &[&str])] = &[
    ("PRFT_GAIN_BP_OTHR_SPECLTV_BUS", &["DEEMED_TI_SEC115JB"]),
    ("PRFT_GAIN_BP_SPECLTV_BUS", &["DEEMED_TI_SEC115JB"]),
    ("PRFT_GAIN_BP_SPCFD_BUS", &["DEEMED_TI_SEC115JB"]),
    ("TOTAL_INCOME_OS", &["DEEMED_TI_SEC115JB"]),
    ("ST_CG_AMT_1", &[]),
    ("LT_CG_AMT_1", &[]),
];

const CONSUMPTION_VARIABLES: &[(&str, &[&str])] = &[
    ("CONS_CEREAL", &[]),
    ("CONS_PULSES", &[]),
    ("CONS_MILK", &[]),
    ("CONS_FUEL", &[]),
    ("CONS_CLOTHING", &[]),
    ("CONS_OTHER", &[]),
];

/// Wage variables, which carry employer payroll levies
const WAGE_VARIABLES: &[&str] = &["SALARIES"];

fn variables(kind: EntityKind) -> &'static [(&'static str, &'static [&'static str])] {
    match kind {
        EntityKind::Individual => INDIVIDUAL_VARIABLES,
        EntityKind::Corporate => CORPORATE_VARIABLES,
        EntityKind::Consumption => CONSUMPTION_VARIABLES,
    }
}

/// Column holding the final liability of each population
pub fn liability_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Individual => "pitax",
        EntityKind::Corporate => "Net_tax_liability",
        EntityKind::Consumption => "gst",
    }
}

/// Options for one marginal rate query
#[derive(Debug, Clone)]
pub struct MarginalRateRequest {
    pub kind: EntityKind,
    pub variable: String,
    /// Measure with a decrease instead of an increase
    pub negative_finite_diff: bool,
    /// Divide by the change in total compensation, employer levies included
    pub wrt_full_compensation: bool,
    pub finite_diff: f64,
}

impl Default for MarginalRateRequest {
    fn default() -> Self {
        Self {
            kind: EntityKind::Individual,
            variable: "SALARIES".to_string(),
            negative_finite_diff: false,
            wrt_full_compensation: true,
            finite_diff: 0.01,
        }
    }
}

/// Per-record marginal rates for one variable
#[derive(Debug, Clone, Serialize)]
pub struct MarginalRates {
    pub kind: EntityKind,
    pub variable: String,
    pub liability_column: String,
    pub rates: Vec<f64>,
}

impl Simulation {
    /// Marginal liability rate of every record with respect to one variable
    pub fn marginal_rates(&mut self, request: &MarginalRateRequest) -> SimResult<MarginalRates> {
        let kind = request.kind;
        let composites = variables(kind)
            .iter()
            .find(|(name, _)| *name == request.variable)
            .map(|(_, composites)| *composites)
            .ok_or_else(|| {
                SimError::schema(format!(
                    "{} is not a valid {kind} marginal rate variable",
                    request.variable
                ))
            })?;
        if request.finite_diff <= 0.0 {
            return Err(SimError::config("finite difference must be positive"));
        }
        let delta = if request.negative_finite_diff {
            -request.finite_diff
        } else {
            request.finite_diff
        };
        let liability = liability_column(kind);

        self.calc_all()?;
        let baseline = self.array(kind, liability)?.to_vec();
        let levels = self.array(kind, &request.variable)?.to_vec();

        self.store_snapshot(kind)?;
        let perturbed =
            self.perturbed_liability(kind, &request.variable, composites, delta, liability);
        self.restore_snapshot()?;
        self.calc_all()?;
        let perturbed = perturbed?;

        let is_wage = WAGE_VARIABLES.contains(&request.variable.as_str());
        let adjustments = if request.wrt_full_compensation && is_wage {
            self.payroll_adjustments(&levels)?
        } else {
            vec![0.0; levels.len()]
        };
        let rates = perturbed
            .iter()
            .zip(&baseline)
            .zip(&adjustments)
            .map(|((after, before), adj)| (after - before) / (delta * (1.0 + adj)))
            .collect();

        Ok(MarginalRates {
            kind,
            variable: request.variable.clone(),
            liability_column: liability.to_string(),
            rates,
        })
    }

    fn perturbed_liability(
        &mut self,
        kind: EntityKind,
        variable: &str,
        composites: &[&str],
        delta: f64,
        liability: &str,
    ) -> SimResult<Vec<f64>> {
        for name in std::iter::once(variable).chain(composites.iter().copied()) {
            let values = self.array(kind, name)?.iter().map(|v| v + delta).collect();
            self.set_array(kind, name, values)?;
        }
        self.calc_all()?;
        Ok(self.array(kind, liability)?.to_vec())
    }

    /// Employer share of payroll levies per record, as a fraction of wages
    fn payroll_adjustments(&self, wages: &[f64]) -> SimResult<Vec<f64>> {
        let ss = self.policy.real("payroll_ss_rate")?;
        let mc = self.policy.real("payroll_mc_rate")?;
        let cap = self.policy.real("payroll_wage_cap")?;
        Ok(wages
            .iter()
            .map(|w| if *w < cap { 0.5 * (ss + mc) } else { 0.5 * mc })
            .collect())
    }
}
