//! Personal income tax stages

use rayon::prelude::*;

use super::{map_column, names, policy_array, sum_columns, FnStage, Stage, StageContext};
use crate::error::SimResult;

/// Calculation sequence for individual filers
pub fn stages() -> Vec<Box<dyn Stage>> {
    vec![
        stage("net_salary_income", &["SALARIES"], &["Income_Salary"], net_salary_income),
        stage("net_rental_income", &["INCOME_HP"], &["Income_HP"], net_rental_income),
        stage("income_business_profession", &BUSINESS_HEADS, &["Income_BP"], income_business_profession),
        stage("total_other_income", &["TOTAL_INCOME_OS"], &["Income_OS"], total_other_income),
        stage("current_year_losses", &["CYL_SET_OFF"], &["CY_Losses"], current_year_losses),
        stage("brought_fwd_losses", &["BFL_SET_OFF_BALANCE"], &["BF_Losses"], brought_fwd_losses),
        stage(
            "gross_total_income",
            &[
                "Income_Salary",
                "Income_HP",
                "Income_BP",
                "ST_CG_AMT_1",
                "ST_CG_AMT_2",
                "ST_CG_AMT_APPRATE",
                "LT_CG_AMT_1",
                "LT_CG_AMT_2",
                "Income_OS",
                "CY_Losses",
                "BF_Losses",
            ],
            &["GTI"],
            gross_total_income,
        ),
        stage("itemized_deductions", &["TOTAL_DEDUC_VIA", "TOTAL_DEDUC_10AA"], &["deductions"], itemized_deductions),
        stage("agri_income", &["NET_AGRC_INCOME"], &["Income_Rate_Purpose"], agri_income),
        stage(
            "tax_stcg_splrate",
            &["ST_CG_AMT_1", "ST_CG_AMT_2"],
            &["Tax_ST_CG_RATE1", "Tax_ST_CG_RATE2", "Total_Tax_STCG"],
            tax_stcg_splrate,
        ),
        stage(
            "tax_ltcg_splrate",
            &["LT_CG_AMT_1", "LT_CG_AMT_2"],
            &["Tax_LT_CG_RATE1", "Tax_LT_CG_RATE2", "Total_Tax_LTCG"],
            tax_ltcg_splrate,
        ),
        stage(
            "tax_specialrates",
            &["ST_CG_AMT_1", "ST_CG_AMT_2", "LT_CG_AMT_1", "LT_CG_AMT_2", "Total_Tax_STCG", "Total_Tax_LTCG"],
            &["TI_special_rates", "tax_TI_special_rates"],
            tax_specialrates,
        ),
        stage("taxable_total_income", &["GTI", "deductions"], &["TTI"], taxable_total_income),
        stage(
            "pit_liability",
            &[
                "TTI",
                "TI_special_rates",
                "tax_TI_special_rates",
                "Income_Rate_Purpose",
                "AGEGRP",
                "Total_Tax_STCG",
                "Total_Tax_LTCG",
            ],
            &[
                "Aggregate_Income",
                "tax_Aggregate_Income",
                "rebate_agri",
                "tax_TTI",
                "Total_Tax_Cap_Gains",
                "rebate",
                "surcharge",
                "cess",
                "pitax",
            ],
            pit_liability,
        ),
    ]
}

const BUSINESS_HEADS: [&str; 4] = [
    "PRFT_GAIN_BP_OTHR_SPECLTV_BUS",
    "PRFT_GAIN_BP_SPECLTV_BUS",
    "PRFT_GAIN_BP_SPCFD_BUS",
    "PRFT_GAIN_BP_INC_115BBF",
];

fn stage(
    name: &str,
    reads: &[&str],
    writes: &[&str],
    func: fn(&mut StageContext<'_>) -> SimResult<()>,
) -> Box<dyn Stage> {
    Box::new(FnStage::new(name, names(reads), names(writes), func))
}

/// Gross salary less the standard deduction
fn net_salary_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let std_deduction = ctx.policy().real("std_deduction")?;
    map_column(ctx, "SALARIES", "Income_Salary", |s| (s - std_deduction).max(0.0))
}

fn net_rental_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    map_column(ctx, "INCOME_HP", "Income_HP", |x| x)
}

fn income_business_profession(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let out = sum_columns(ctx, &BUSINESS_HEADS)?;
    ctx.write("Income_BP", out)
}

fn total_other_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    map_column(ctx, "TOTAL_INCOME_OS", "Income_OS", |x| x)
}

/// Current-year losses set off, from schedule CYLA
fn current_year_losses(ctx: &mut StageContext<'_>) -> SimResult<()> {
    map_column(ctx, "CYL_SET_OFF", "CY_Losses", |x| x)
}

/// Brought-forward losses set off, from schedule BFLA
fn brought_fwd_losses(ctx: &mut StageContext<'_>) -> SimResult<()> {
    map_column(ctx, "BFL_SET_OFF_BALANCE", "BF_Losses", |x| x)
}

/// GTI including capital gains taxed at special rates, net of losses
fn gross_total_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let income = sum_columns(
        ctx,
        &[
            "Income_Salary",
            "Income_HP",
            "Income_BP",
            "ST_CG_AMT_1",
            "ST_CG_AMT_2",
            "ST_CG_AMT_APPRATE",
            "LT_CG_AMT_1",
            "LT_CG_AMT_2",
            "Income_OS",
        ],
    )?;
    let losses = sum_columns(ctx, &["CY_Losses", "BF_Losses"])?;
    let gti = income
        .par_iter()
        .zip(&losses)
        .map(|(i, l)| (i - l).max(0.0))
        .collect();
    ctx.write("GTI", gti)
}

fn itemized_deductions(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let out = sum_columns(ctx, &["TOTAL_DEDUC_VIA", "TOTAL_DEDUC_10AA"])?;
    ctx.write("deductions", out)
}

/// Agricultural income is exempt but counts for rate purposes
fn agri_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    map_column(ctx, "NET_AGRC_INCOME", "Income_Rate_Purpose", |x| x)
}

fn tax_stcg_splrate(ctx: &mut StageContext<'_>) -> SimResult<()> {
    special_rate_tax(
        ctx,
        ["ST_CG_AMT_1", "ST_CG_AMT_2"],
        ["ST_CG_RATE1", "ST_CG_RATE2"],
        ["Tax_ST_CG_RATE1", "Tax_ST_CG_RATE2", "Total_Tax_STCG"],
    )
}

fn tax_ltcg_splrate(ctx: &mut StageContext<'_>) -> SimResult<()> {
    special_rate_tax(
        ctx,
        ["LT_CG_AMT_1", "LT_CG_AMT_2"],
        ["LT_CG_RATE1", "LT_CG_RATE2"],
        ["Tax_LT_CG_RATE1", "Tax_LT_CG_RATE2", "Total_Tax_LTCG"],
    )
}

fn special_rate_tax(
    ctx: &mut StageContext<'_>,
    amounts: [&str; 2],
    rates: [&str; 2],
    outputs: [&str; 3],
) -> SimResult<()> {
    let rate1 = ctx.policy().real(rates[0])?;
    let rate2 = ctx.policy().real(rates[1])?;
    let tax1: Vec<f64> = ctx.column(amounts[0])?.par_iter().map(|a| a * rate1).collect();
    let tax2: Vec<f64> = ctx.column(amounts[1])?.par_iter().map(|a| a * rate2).collect();
    let total = tax1.iter().zip(&tax2).map(|(a, b)| a + b).collect();
    ctx.write(outputs[0], tax1)?;
    ctx.write(outputs[1], tax2)?;
    ctx.write(outputs[2], total)
}

fn tax_specialrates(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let income = sum_columns(ctx, &["ST_CG_AMT_1", "ST_CG_AMT_2", "LT_CG_AMT_1", "LT_CG_AMT_2"])?;
    let tax = sum_columns(ctx, &["Total_Tax_STCG", "Total_Tax_LTCG"])?;
    ctx.write("TI_special_rates", income)?;
    ctx.write("tax_TI_special_rates", tax)
}

fn taxable_total_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let gti = ctx.column("GTI")?;
    let deductions = ctx.column("deductions")?;
    let tti = gti
        .par_iter()
        .zip(deductions)
        .map(|(g, d)| (g - d).max(0.0))
        .collect();
    ctx.write("TTI", tti)
}

/// Normal-rate schedule parameters for one year
struct PitSchedule {
    rates: [f64; 4],
    tbrk1: [f64; 3],
    tbrk2: [f64; 3],
    tbrk3: [f64; 3],
    rebate_rate: f64,
    rebate_thd: f64,
    rebate_ceiling: f64,
    surcharge_rate: [f64; 3],
    surcharge_thd: [f64; 2],
    cess_rate: f64,
    agri_rebate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PitRow {
    aggregate_income: f64,
    tax_aggregate_income: f64,
    rebate_agri: f64,
    tax_tti: f64,
    total_tax_cap_gains: f64,
    rebate: f64,
    surcharge: f64,
    cess: f64,
    pitax: f64,
}

impl PitSchedule {
    fn load(ctx: &StageContext<'_>) -> SimResult<Self> {
        let p = ctx.policy();
        Ok(Self {
            rates: [p.real("rate1")?, p.real("rate2")?, p.real("rate3")?, p.real("rate4")?],
            tbrk1: policy_array(p, "tbrk1")?,
            tbrk2: policy_array(p, "tbrk2")?,
            tbrk3: policy_array(p, "tbrk3")?,
            rebate_rate: p.real("rebate_rate")?,
            rebate_thd: p.real("rebate_thd")?,
            rebate_ceiling: p.real("rebate_ceiling")?,
            surcharge_rate: policy_array(p, "surcharge_rate")?,
            surcharge_thd: policy_array(p, "surcharge_thd")?,
            cess_rate: p.real("cess_rate")?,
            agri_rebate: p.flag("rebate_agri_applies")?,
        })
    }

    fn brackets(&self, agegrp: f64) -> [f64; 3] {
        let g = (agegrp.max(0.0) as usize).min(2);
        [self.tbrk1[g], self.tbrk2[g], self.tbrk3[g]]
    }

    fn bracket_tax(&self, income: f64, brk: [f64; 3]) -> f64 {
        let r = &self.rates;
        r[0] * income.min(brk[0])
            + r[1] * (brk[1] - brk[0]).min((income - brk[0]).max(0.0))
            + r[2] * (brk[2] - brk[1]).min((income - brk[1]).max(0.0))
            + r[3] * (income - brk[2]).max(0.0)
    }

    /// Liability of one filer
    #[allow(clippy::too_many_arguments)]
    fn liability(
        &self,
        tti: f64,
        ti_special: f64,
        tax_special: f64,
        rate_purpose: f64,
        agegrp: f64,
        stcg_tax: f64,
        ltcg_tax: f64,
    ) -> PitRow {
        let taxinc = (tti - ti_special).max(0.0);
        let agginc = (taxinc + rate_purpose).max(0.0);
        let brk = self.brackets(agegrp);

        let tax_normal = self.bracket_tax(agginc, brk);
        let mut tax_tti = tax_normal + tax_special;

        // partial integration of agricultural income
        let mut rebate_agri = 0.0;
        if self.agri_rebate && rate_purpose > 0.0 && taxinc > brk[0] {
            rebate_agri = self.bracket_tax(rate_purpose + brk[0], brk).min(tax_tti);
        }
        tax_tti -= rebate_agri;

        let rebate = if tti > self.rebate_thd {
            0.0
        } else {
            (self.rebate_rate * tti).min(self.rebate_ceiling).min(tax_tti)
        };
        let mut tax = tax_tti - rebate;

        let surcharge_rate = if tti < self.surcharge_thd[0] {
            self.surcharge_rate[0]
        } else if tti < self.surcharge_thd[1] {
            self.surcharge_rate[1]
        } else {
            self.surcharge_rate[2]
        };
        let surcharge = tax * surcharge_rate;
        tax += surcharge;
        let cess = tax * self.cess_rate;

        PitRow {
            aggregate_income: taxinc,
            tax_aggregate_income: tax_normal,
            rebate_agri,
            tax_tti,
            total_tax_cap_gains: stcg_tax + ltcg_tax,
            rebate,
            surcharge,
            cess,
            pitax: tax + cess,
        }
    }
}

/// Progressive-schedule liability with rebates, surcharge and cess
fn pit_liability(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let schedule = PitSchedule::load(ctx)?;
    let cols = ctx.columns(&[
        "TTI",
        "TI_special_rates",
        "tax_TI_special_rates",
        "Income_Rate_Purpose",
        "AGEGRP",
        "Total_Tax_STCG",
        "Total_Tax_LTCG",
    ])?;
    let rows: Vec<PitRow> = (0..ctx.rows())
        .into_par_iter()
        .map(|i| {
            schedule.liability(cols[0][i], cols[1][i], cols[2][i], cols[3][i], cols[4][i], cols[5][i], cols[6][i])
        })
        .collect();

    ctx.write("Aggregate_Income", rows.iter().map(|r| r.aggregate_income).collect())?;
    ctx.write("tax_Aggregate_Income", rows.iter().map(|r| r.tax_aggregate_income).collect())?;
    ctx.write("rebate_agri", rows.iter().map(|r| r.rebate_agri).collect())?;
    ctx.write("tax_TTI", rows.iter().map(|r| r.tax_tti).collect())?;
    ctx.write("Total_Tax_Cap_Gains", rows.iter().map(|r| r.total_tax_cap_gains).collect())?;
    ctx.write("rebate", rows.iter().map(|r| r.rebate).collect())?;
    ctx.write("surcharge", rows.iter().map(|r| r.surcharge).collect())?;
    ctx.write("cess", rows.iter().map(|r| r.cess).collect())?;
    ctx.write("pitax", rows.iter().map(|r| r.pitax).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Pipeline;
    use crate::policy::{ParameterValue, PolicyParameterStore};
    use crate::records::{Dataset, EntityKind, EntityStore, Schema};
    use approx::assert_relative_eq;

    fn run(columns: Vec<(&str, Vec<f64>)>, policy: &PolicyParameterStore) -> EntityStore {
        let schema = Schema::builtin(EntityKind::Individual).unwrap();
        let pipeline = Pipeline::standard(&schema).unwrap();
        let mut store = EntityStore::load(&Dataset::from_columns(columns).unwrap(), schema, policy.current_year()).unwrap();
        pipeline.run(&mut store, policy).unwrap();
        store
    }

    #[test]
    fn test_salary_only_filer() {
        let policy = PolicyParameterStore::current_law().unwrap();
        let store = run(
            vec![("AGEGRP", vec![0.0, 0.0]), ("SALARIES", vec![600000.0, 400000.0])],
            &policy,
        );
        let pitax = store.column_by_name("pitax").unwrap();
        // 10% of 250k-500k, 20% above, 3% cess
        assert_relative_eq!(pitax[0], 46350.0, epsilon = 1e-6);
        // 15000 less the 5000 rebate, plus cess
        assert_relative_eq!(pitax[1], 10300.0, epsilon = 1e-6);
        assert_relative_eq!(store.column_by_name("rebate").unwrap()[1], 5000.0);
    }

    #[test]
    fn test_senior_brackets() {
        let policy = PolicyParameterStore::current_law().unwrap();
        let store = run(vec![("AGEGRP", vec![2.0]), ("SALARIES", vec![600000.0])], &policy);
        // very senior filers pay nothing up to 500k
        let tax = store.column_by_name("tax_Aggregate_Income").unwrap()[0];
        assert_relative_eq!(tax, 20000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_losses_and_deductions_floor_at_zero() {
        let policy = PolicyParameterStore::current_law().unwrap();
        let store = run(
            vec![
                ("AGEGRP", vec![0.0]),
                ("SALARIES", vec![100000.0]),
                ("CYL_SET_OFF", vec![150000.0]),
                ("TOTAL_DEDUC_VIA", vec![10000.0]),
            ],
            &policy,
        );
        assert_eq!(store.column_by_name("GTI").unwrap(), &[0.0]);
        assert_eq!(store.column_by_name("TTI").unwrap(), &[0.0]);
        assert_eq!(store.column_by_name("pitax").unwrap(), &[0.0]);
    }

    #[test]
    fn test_special_rate_gains_taxed_separately() {
        let policy = PolicyParameterStore::current_law().unwrap();
        let st1 = policy.real("ST_CG_RATE1").unwrap();
        let lt2 = policy.real("LT_CG_RATE2").unwrap();
        let store = run(
            vec![
                ("AGEGRP", vec![0.0]),
                ("ST_CG_AMT_1", vec![100000.0]),
                ("LT_CG_AMT_2", vec![200000.0]),
            ],
            &policy,
        );
        assert_relative_eq!(store.column_by_name("TI_special_rates").unwrap()[0], 300000.0);
        assert_relative_eq!(
            store.column_by_name("tax_TI_special_rates").unwrap()[0],
            100000.0 * st1 + 200000.0 * lt2
        );
        // nothing left at normal rates
        assert_eq!(store.column_by_name("Aggregate_Income").unwrap(), &[0.0]);
    }

    #[test]
    fn test_flat_schedule_is_proportional() {
        let mut policy = PolicyParameterStore::current_law().unwrap();
        for name in ["rate1", "rate2", "rate3", "rate4"] {
            policy.set(name, ParameterValue::Real(0.25)).unwrap();
        }
        policy.set("rebate_rate", ParameterValue::Real(0.0)).unwrap();
        policy.set("cess_rate", ParameterValue::Real(0.0)).unwrap();
        policy.set("surcharge_rate", ParameterValue::Vector(vec![0.0; 3])).unwrap();
        let store = run(vec![("AGEGRP", vec![1.0]), ("SALARIES", vec![2_000_000.0])], &policy);
        assert_relative_eq!(store.column_by_name("pitax").unwrap()[0], 500_000.0, epsilon = 1e-6);
    }
}
