//! Corporate income tax stages
//!
//! The corporate sequence is the only one that touches carryforward state.
//! Depreciation reads the opening written-down value of each block and
//! writes the closing value; loss set-off and MAT credit reconciliation read
//! the opening lag slots and write post-set-off closing slots plus the
//! year's new contribution. See [`crate::carryforward`] for how those
//! columns move into the next year.

use rayon::prelude::*;

use super::{map_column, names, sum_columns, FnStage, Stage, StageContext};
use crate::carryforward::{
    closing_wdv, loss_close, loss_lag, mat_close, mat_lag, opening_wdv, DEPRECIATION_BLOCKS,
    LOSS_SLOTS, MAT_CREDIT_SLOTS, NEW_LOSS, NEW_MAT_CREDIT,
};
use crate::error::{SimError, SimResult};

const PROFIT_HEADS: [&str; 3] = [
    "PRFT_GAIN_BP_OTHR_SPECLTV_BUS",
    "PRFT_GAIN_BP_SPECLTV_BUS",
    "PRFT_GAIN_BP_SPCFD_BUS",
];

const CAPITAL_GAINS: [&str; 4] = ["ST_CG_AMT_1", "ST_CG_AMT_2", "LT_CG_AMT_1", "LT_CG_AMT_2"];

pub fn dep_amount(block: &str) -> String {
    format!("dep_amt_{block}")
}

fn additions_more_than_180_days(block: &str) -> String {
    format!("PADDTNS_180_DAYS__MOR_PY_{block}")
}

fn additions_less_than_180_days(block: &str) -> String {
    format!("PADDTNS_LESS_180_DAYS_{block}")
}

fn capital_receipts_before_180_days(block: &str) -> String {
    format!("PCR34_PY_{block}")
}

fn capital_receipts_after_180_days(block: &str) -> String {
    format!("PCR7_PY_{block}")
}

fn transfer_expenses(block: &str) -> String {
    format!("PEXP_INCURRD_TRF_ASSTS_{block}")
}

/// Calculation sequence for corporate returns
pub fn stages() -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = DEPRECIATION_BLOCKS
        .iter()
        .enumerate()
        .map(|(index, block)| Box::new(BlockDepreciation::new(index, block)) as Box<dyn Stage>)
        .collect();

    let dep_columns: Vec<String> = DEPRECIATION_BLOCKS.iter().map(|b| dep_amount(b)).collect();
    let addition_columns: Vec<String> = DEPRECIATION_BLOCKS
        .iter()
        .flat_map(|b| [additions_more_than_180_days(b), additions_less_than_180_days(b)])
        .collect();

    stages.push(Box::new(FnStage::new(
        "total_depreciation",
        dep_columns,
        names(&["Total_depreciation"]),
        total_depreciation,
    )));
    stages.push(Box::new(FnStage::new(
        "total_additions",
        addition_columns,
        names(&["Total_additions"]),
        total_additions,
    )));

    let mut reads = names(&PROFIT_HEADS);
    reads.push("Total_depreciation".into());
    stages.push(Box::new(FnStage::new(
        "business_income",
        reads,
        names(&["Income_BP"]),
        business_income,
    )));

    let mut reads = names(&["Income_BP", "INCOME_HP", "TOTAL_INCOME_OS"]);
    reads.extend(names(&CAPITAL_GAINS));
    stages.push(Box::new(FnStage::new(
        "gti_before_set_off",
        reads,
        names(&["GTI_Before_Loss"]),
        gti_before_set_off,
    )));

    let mut reads = vec!["GTI_Before_Loss".to_string()];
    reads.extend((1..=LOSS_SLOTS).map(loss_lag));
    let mut writes = vec![NEW_LOSS.to_string(), "Loss_used".into(), "GTI".into()];
    writes.extend((1..=LOSS_SLOTS).map(loss_close));
    stages.push(Box::new(FnStage::new("loss_set_off", reads, writes, loss_set_off)));

    stages.push(Box::new(FnStage::new(
        "corporate_deductions",
        names(&["TOTAL_DEDUC_VIA", "DEDUCT_SEC_10A_OR_10AA"]),
        names(&["deductions"]),
        corporate_deductions,
    )));
    stages.push(Box::new(FnStage::new(
        "taxable_total_income",
        names(&["GTI", "deductions"]),
        names(&["TTI"]),
        taxable_total_income,
    )));

    let mut reads = vec!["TTI".to_string()];
    reads.extend(names(&CAPITAL_GAINS));
    stages.push(Box::new(FnStage::new(
        "cit_liability",
        reads,
        names(&[
            "TI_special_rates",
            "tax_TI_special_rates",
            "tax_normal_rates",
            "surcharge",
            "cess",
            "citax",
        ]),
        cit_liability,
    )));

    stages.push(Box::new(FnStage::new(
        "mat_liability",
        names(&["DEEMED_TI_SEC115JB"]),
        names(&["MAT"]),
        mat_liability,
    )));

    let mut reads = names(&["citax", "MAT"]);
    reads.extend((1..=MAT_CREDIT_SLOTS).map(mat_lag));
    let mut writes = vec![NEW_MAT_CREDIT.to_string(), "MAT_credit_used".into()];
    writes.extend((1..=MAT_CREDIT_SLOTS).map(mat_close));
    stages.push(Box::new(FnStage::new("mat_credit", reads, writes, mat_credit)));

    stages.push(Box::new(FnStage::new(
        "net_tax_liability",
        names(&["citax", "MAT", "MAT_credit_used", "RELIEF_90", "RELIEF_91"]),
        names(&["Net_tax_liability"]),
        net_tax_liability,
    )));
    stages
}

/// Depreciation on one block of assets
///
/// Assets held more than 180 days take the full rate, later additions half
/// of it. Sale proceeds net of transfer costs come off the full-rate base
/// first; any excess reduces the half-rate base.
struct BlockDepreciation {
    name: String,
    index: usize,
    opening: String,
    more: String,
    less: String,
    receipts_early: String,
    receipts_late: String,
    expenses: String,
    dep: String,
    closing: String,
}

impl BlockDepreciation {
    fn new(index: usize, block: &str) -> Self {
        Self {
            name: format!("depreciation_{block}"),
            index,
            opening: opening_wdv(block),
            more: additions_more_than_180_days(block),
            less: additions_less_than_180_days(block),
            receipts_early: capital_receipts_before_180_days(block),
            receipts_late: capital_receipts_after_180_days(block),
            expenses: transfer_expenses(block),
            dep: dep_amount(block),
            closing: closing_wdv(block),
        }
    }
}

/// Depreciation and closing written-down value of one block for one company
pub(crate) fn block_depreciation(
    rate: f64,
    opening: f64,
    more: f64,
    less: f64,
    receipts: f64,
    expenses: f64,
) -> (f64, f64) {
    let mut full = opening + more - (receipts - expenses);
    let half = if full < 0.0 {
        let half = (less + full).max(0.0);
        full = 0.0;
        half
    } else {
        less
    };
    let dep = rate * full + 0.5 * rate * half;
    (dep, full + half - dep)
}

impl Stage for BlockDepreciation {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        vec![
            self.opening.clone(),
            self.more.clone(),
            self.less.clone(),
            self.receipts_early.clone(),
            self.receipts_late.clone(),
            self.expenses.clone(),
        ]
    }

    fn writes(&self) -> Vec<String> {
        vec![self.dep.clone(), self.closing.clone()]
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> SimResult<()> {
        let rates = ctx.policy().vector("rate_depreciation")?;
        let rate = rates.get(self.index).copied().ok_or_else(|| {
            SimError::schema(format!(
                "rate_depreciation has no rate for block {}",
                self.index + 1
            ))
        })?;
        let cols = ctx.columns(&self.reads())?;
        let (dep, closing): (Vec<f64>, Vec<f64>) = (0..ctx.rows())
            .into_par_iter()
            .map(|i| {
                block_depreciation(rate, cols[0][i], cols[1][i], cols[2][i], cols[3][i] + cols[4][i], cols[5][i])
            })
            .unzip();
        ctx.write(&self.dep, dep)?;
        ctx.write(&self.closing, closing)
    }
}

fn total_depreciation(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let cols: Vec<String> = DEPRECIATION_BLOCKS.iter().map(|b| dep_amount(b)).collect();
    let out = sum_columns(ctx, &cols)?;
    ctx.write("Total_depreciation", out)
}

fn total_additions(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let cols: Vec<String> = DEPRECIATION_BLOCKS
        .iter()
        .flat_map(|b| [additions_more_than_180_days(b), additions_less_than_180_days(b)])
        .collect();
    let out = sum_columns(ctx, &cols)?;
    ctx.write("Total_additions", out)
}

fn business_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let profit = sum_columns(ctx, &PROFIT_HEADS)?;
    let dep = ctx.column("Total_depreciation")?;
    let out = profit.par_iter().zip(dep).map(|(p, d)| p - d).collect();
    ctx.write("Income_BP", out)
}

fn gti_before_set_off(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let mut heads = vec!["Income_BP", "INCOME_HP", "TOTAL_INCOME_OS"];
    heads.extend(CAPITAL_GAINS);
    let out = sum_columns(ctx, &heads)?;
    ctx.write("GTI_Before_Loss", out)
}

/// Use aged balances oldest first, looking at the first `usable` slots only
///
/// Returns the remaining balances and the amount used.
pub(crate) fn absorb<const N: usize>(mut balances: [f64; N], usable: usize, amount: f64) -> ([f64; N], f64) {
    let mut remaining = amount.max(0.0);
    let mut used = 0.0;
    for slot in (0..usable.min(N)).rev() {
        if remaining <= 0.0 {
            break;
        }
        let take = balances[slot].min(remaining).max(0.0);
        balances[slot] -= take;
        remaining -= take;
        used += take;
    }
    (balances, used)
}

fn gather<const N: usize>(cols: &[&[f64]], row: usize) -> [f64; N] {
    std::array::from_fn(|slot| cols[slot][row])
}

fn scatter<const N: usize>(rows: &[[f64; N]]) -> Vec<Vec<f64>> {
    (0..N).map(|slot| rows.iter().map(|r| r[slot]).collect()).collect()
}

/// Set off brought-forward business losses against this year's income
///
/// A negative result becomes this year's new loss and nothing is absorbed.
fn loss_set_off(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let usable = ctx.policy().real("loss_cf_years")?.max(0.0) as usize;
    let lags: Vec<String> = (1..=LOSS_SLOTS).map(loss_lag).collect();
    let opening = ctx.columns(&lags)?;
    let before = ctx.column("GTI_Before_Loss")?;

    struct Row {
        new_loss: f64,
        used: f64,
        gti: f64,
        closing: [f64; LOSS_SLOTS],
    }
    let rows: Vec<Row> = (0..ctx.rows())
        .into_par_iter()
        .map(|i| {
            let balances: [f64; LOSS_SLOTS] = gather(&opening, i);
            if before[i] < 0.0 {
                Row {
                    new_loss: -before[i],
                    used: 0.0,
                    gti: 0.0,
                    closing: balances,
                }
            } else {
                let (closing, used) = absorb(balances, usable, before[i]);
                Row {
                    new_loss: 0.0,
                    used,
                    gti: before[i] - used,
                    closing,
                }
            }
        })
        .collect();

    let closing: Vec<[f64; LOSS_SLOTS]> = rows.iter().map(|r| r.closing).collect();
    ctx.write(NEW_LOSS, rows.iter().map(|r| r.new_loss).collect())?;
    ctx.write("Loss_used", rows.iter().map(|r| r.used).collect())?;
    ctx.write("GTI", rows.iter().map(|r| r.gti).collect())?;
    for (slot, values) in scatter(&closing).into_iter().enumerate() {
        ctx.write(&loss_close(slot + 1), values)?;
    }
    Ok(())
}

fn corporate_deductions(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let out = sum_columns(ctx, &["TOTAL_DEDUC_VIA", "DEDUCT_SEC_10A_OR_10AA"])?;
    ctx.write("deductions", out)
}

fn taxable_total_income(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let gti = ctx.column("GTI")?;
    let deductions = ctx.column("deductions")?;
    let out = gti
        .par_iter()
        .zip(deductions)
        .map(|(g, d)| (g - d).max(0.0))
        .collect();
    ctx.write("TTI", out)
}

/// Flat-rate tax on normal income plus special-rate capital gains
fn cit_liability(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let p = ctx.policy();
    let cit_rate = p.real("cit_rate")?;
    let surcharge_rate = p.real("cit_surcharge_rate")?;
    let cess_rate = p.real("cit_cess_rate")?;
    let gain_rates = [
        p.real("ST_CG_RATE1")?,
        p.real("ST_CG_RATE2")?,
        p.real("LT_CG_RATE1")?,
        p.real("LT_CG_RATE2")?,
    ];
    let tti = ctx.column("TTI")?;
    let gains = ctx.columns(&CAPITAL_GAINS)?;

    let rows: Vec<[f64; 6]> = (0..ctx.rows())
        .into_par_iter()
        .map(|i| {
            let special: f64 = gains.iter().map(|g| g[i]).sum();
            let tax_special: f64 = gains.iter().zip(gain_rates).map(|(g, r)| g[i] * r).sum();
            let tax_normal = cit_rate * (tti[i] - special).max(0.0);
            let tax = tax_normal + tax_special;
            let surcharge = tax * surcharge_rate;
            let cess = (tax + surcharge) * cess_rate;
            [special, tax_special, tax_normal, surcharge, cess, tax + surcharge + cess]
        })
        .collect();

    let outputs = [
        "TI_special_rates",
        "tax_TI_special_rates",
        "tax_normal_rates",
        "surcharge",
        "cess",
        "citax",
    ];
    for (name, values) in outputs.iter().zip(scatter(&rows)) {
        ctx.write(name, values)?;
    }
    Ok(())
}

/// Minimum alternate tax on book profit
fn mat_liability(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let p = ctx.policy();
    let rate = if p.flag("mat_applies")? {
        p.real("mat_rate")? * (1.0 + p.real("cit_cess_rate")?)
    } else {
        0.0
    };
    map_column(ctx, "DEEMED_TI_SEC115JB", "MAT", |book| rate * book.max(0.0))
}

/// MAT above regular tax becomes new credit; otherwise old credit is used
/// against the excess of regular tax over MAT
fn mat_credit(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let usable = ctx.policy().real("mat_credit_years")?.max(0.0) as usize;
    let lags: Vec<String> = (1..=MAT_CREDIT_SLOTS).map(mat_lag).collect();
    let opening = ctx.columns(&lags)?;
    let citax = ctx.column("citax")?;
    let mat = ctx.column("MAT")?;

    let rows: Vec<(f64, f64, [f64; MAT_CREDIT_SLOTS])> = (0..ctx.rows())
        .into_par_iter()
        .map(|i| {
            let balances: [f64; MAT_CREDIT_SLOTS] = gather(&opening, i);
            if mat[i] > citax[i] {
                (mat[i] - citax[i], 0.0, balances)
            } else {
                let (closing, used) = absorb(balances, usable, citax[i] - mat[i]);
                (0.0, used, closing)
            }
        })
        .collect();

    let closing: Vec<[f64; MAT_CREDIT_SLOTS]> = rows.iter().map(|r| r.2).collect();
    ctx.write(NEW_MAT_CREDIT, rows.iter().map(|r| r.0).collect())?;
    ctx.write("MAT_credit_used", rows.iter().map(|r| r.1).collect())?;
    for (slot, values) in scatter(&closing).into_iter().enumerate() {
        ctx.write(&mat_close(slot + 1), values)?;
    }
    Ok(())
}

fn net_tax_liability(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let cols = ctx.columns(&["citax", "MAT", "MAT_credit_used", "RELIEF_90", "RELIEF_91"])?;
    let out = (0..ctx.rows())
        .into_par_iter()
        .map(|i| (cols[0][i].max(cols[1][i]) - cols[2][i] - cols[3][i] - cols[4][i]).max(0.0))
        .collect();
    ctx.write("Net_tax_liability", out)
}
