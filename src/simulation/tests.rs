use std::sync::Arc;

use approx::assert_relative_eq;

use super::*;
use crate::carryforward::{
    closing_wdv, loss_close, loss_lag, mat_close, mat_lag, opening_wdv, DEPRECIATION_BLOCKS,
    LOSS_SLOTS, MAT_CREDIT_SLOTS, NEW_LOSS, NEW_MAT_CREDIT,
};
use crate::error::ErrorCategory;
use crate::growfactors::GrowthFactorTable;
use crate::policy::{ParameterValue, PolicyParameterStore, Reform};
use crate::records::{Dataset, EntityKind, EntityStore, Schema, WEIGHT_COLUMN};

fn growth() -> Arc<GrowthFactorTable> {
    Arc::new(GrowthFactorTable::builtin().unwrap())
}

fn policy() -> PolicyParameterStore {
    PolicyParameterStore::current_law_with(&growth()).unwrap()
}

fn load(kind: EntityKind, data: Vec<(&str, Vec<f64>)>, weights: Option<Vec<(&str, Vec<f64>)>>) -> EntityStore {
    let ds = Dataset::from_columns(data).unwrap();
    let store = EntityStore::load(&ds, Schema::builtin(kind).unwrap(), 2017)
        .unwrap()
        .with_growth_factors(growth())
        .unwrap();
    match weights {
        Some(w) => store.with_weights(&Dataset::from_columns(w).unwrap()).unwrap(),
        None => store,
    }
}

fn individual() -> EntityStore {
    load(
        EntityKind::Individual,
        vec![
            ("AGEGRP", vec![0.0, 1.0, 0.0]),
            ("SALARIES", vec![300_000.0, 800_000.0, 2_500_000.0]),
            ("INCOME_HP", vec![0.0, 50_000.0, 120_000.0]),
            ("TOTAL_DEDUC_VIA", vec![10_000.0, 150_000.0, 150_000.0]),
        ],
        Some(vec![
            ("WT2017", vec![100.0, 50.0, 10.0]),
            ("WT2018", vec![110.0, 55.0, 11.0]),
        ]),
    )
}

fn corporate() -> EntityStore {
    load(
        EntityKind::Corporate,
        vec![
            ("PRFT_GAIN_BP_OTHR_SPECLTV_BUS", vec![-1_000.0, 5_000.0, 200_000.0]),
            ("DEEMED_TI_SEC115JB", vec![0.0, 0.0, 2_000_000.0]),
            ("LOSS_LAG1", vec![0.0, 300.0, 0.0]),
            ("LOSS_LAG4", vec![0.0, 1_000.0, 0.0]),
            ("LOSS_LAG8", vec![100.0, 700.0, 50.0]),
            ("MAT_LAG3", vec![10.0, 20.0, 30.0]),
            ("MAT_LAG15", vec![5.0, 5.0, 5.0]),
            ("PWR_DOWN_VAL_1ST_DAY_PY_15P", vec![0.0, 2_000.0, 0.0]),
            ("PADDTNS_180_DAYS__MOR_PY_40P", vec![0.0, 500.0, 100.0]),
            ("PADDTNS_LESS_180_DAYS_100P", vec![0.0, 40.0, 0.0]),
        ],
        None,
    )
}

fn consumption() -> EntityStore {
    load(
        EntityKind::Consumption,
        vec![
            ("CONS_CEREAL", vec![12_000.0, 30_000.0]),
            ("CONS_FUEL", vec![8_000.0, 2_000.0]),
            ("CONS_OTHER", vec![1_000.0, 9_000.0]),
        ],
        Some(vec![("WT2017", vec![1_000.0, 3_000.0])]),
    )
}

fn simulation() -> Simulation {
    SimulationBuilder::new(policy())
        .individual(individual())
        .corporate(corporate())
        .consumption(consumption())
        .build()
        .unwrap()
}

/// Every column of a store plus its weights
fn state(store: &EntityStore) -> Vec<(String, Vec<f64>)> {
    let mut out: Vec<(String, Vec<f64>)> = store
        .schema()
        .columns()
        .map(|(id, spec)| (spec.name.clone(), store.column(id).to_vec()))
        .collect();
    out.push((WEIGHT_COLUMN.to_string(), store.weights().to_vec()));
    out
}

fn corp(sim: &Simulation, name: &str) -> Vec<f64> {
    sim.array(EntityKind::Corporate, name).unwrap().to_vec()
}

#[test]
fn test_build_starts_on_data_year() {
    let sim = simulation();
    assert_eq!(sim.current_year(), 2017);
    assert_eq!(sim.kinds(), vec![EntityKind::Corporate, EntityKind::Individual, EntityKind::Consumption]);
    assert!(sim.ledger().is_some());
    assert_eq!(sim.data_year(EntityKind::Individual).unwrap(), 2017);
}

#[test]
fn test_advance_to_year_equals_repeated_increments() {
    let mut stepped = simulation();
    for _ in 0..4 {
        stepped.increment_year().unwrap();
    }
    let mut jumped = simulation();
    jumped.advance_to_year(2021).unwrap();

    assert_eq!(stepped.current_year(), 2021);
    assert_eq!(jumped.current_year(), 2021);
    for kind in EntityKind::ALL {
        assert_eq!(
            state(stepped.store(kind).unwrap()),
            state(jumped.store(kind).unwrap()),
            "{kind} state differs"
        );
    }
}

#[test]
fn test_loss_slots_shift_one_year() {
    let mut sim = simulation();
    sim.calc_all().unwrap();
    let new_loss = corp(&sim, NEW_LOSS);
    let closing: Vec<Vec<f64>> = (1..=LOSS_SLOTS).map(|s| corp(&sim, &loss_close(s))).collect();
    assert_eq!(new_loss, vec![1_000.0, 0.0, 0.0]);

    sim.increment_year().unwrap();
    assert_eq!(corp(&sim, &loss_lag(1)), new_loss);
    for slot in 2..=LOSS_SLOTS {
        assert_eq!(corp(&sim, &loss_lag(slot)), closing[slot - 2], "slot {slot}");
    }
    // the eighth-year balance of a loss year is forfeited
    assert_eq!(closing[LOSS_SLOTS - 1][0], 100.0);
    assert_eq!(corp(&sim, &loss_lag(LOSS_SLOTS))[0], 0.0);
}

#[test]
fn test_mat_credit_slots_shift_one_year() {
    let mut sim = simulation();
    sim.calc_all().unwrap();
    let new_credit = corp(&sim, NEW_MAT_CREDIT);
    let closing: Vec<Vec<f64>> = (1..=MAT_CREDIT_SLOTS).map(|s| corp(&sim, &mat_close(s))).collect();
    assert!(new_credit[2] > 0.0);

    sim.increment_year().unwrap();
    assert_eq!(corp(&sim, &mat_lag(1)), new_credit);
    for slot in 2..=MAT_CREDIT_SLOTS {
        assert_eq!(corp(&sim, &mat_lag(slot)), closing[slot - 2], "slot {slot}");
    }
}

#[test]
fn test_written_down_value_continuity() {
    let mut sim = simulation();
    sim.advance_to_year(2019).unwrap();
    sim.calc_all().unwrap();
    let closing: Vec<Vec<f64>> = DEPRECIATION_BLOCKS.iter().map(|b| corp(&sim, &closing_wdv(b))).collect();

    sim.increment_year().unwrap();
    for (block, expected) in DEPRECIATION_BLOCKS.iter().zip(&closing) {
        assert_eq!(&corp(&sim, &opening_wdv(block)), expected, "block {block}");
    }
    assert!(corp(&sim, &opening_wdv("15P"))[1] > 0.0);
}

#[test]
fn test_advance_computes_uncomputed_corporate_state() {
    let mut sim = simulation();
    sim.increment_year().unwrap();
    assert_eq!(corp(&sim, &loss_lag(1)), vec![1_000.0, 0.0, 0.0]);
    let rate = sim.policy().vector("rate_depreciation").unwrap()[0];
    let (_, closing) = crate::calc::corporate::block_depreciation(rate, 2_000.0, 0.0, 0.0, 0.0, 0.0);
    assert_relative_eq!(corp(&sim, &opening_wdv("15P"))[1], closing);
    // calculated columns of the new year start from zero
    assert_eq!(corp(&sim, "citax"), vec![0.0; 3]);
}

#[test]
fn test_weights_scale_totals_linearly() {
    let mut sim = simulation();
    sim.calc_all().unwrap();
    let before = sim.weighted_total(EntityKind::Individual, "pitax").unwrap();
    let weight_before = sim.total_weight(EntityKind::Individual).unwrap();
    assert!(before > 0.0);

    let k = 2.5;
    let scaled: Vec<f64> = sim
        .array(EntityKind::Individual, WEIGHT_COLUMN)
        .unwrap()
        .iter()
        .map(|w| w * k)
        .collect();
    sim.set_array(EntityKind::Individual, WEIGHT_COLUMN, scaled).unwrap();
    sim.calc_all().unwrap();
    assert_relative_eq!(sim.weighted_total(EntityKind::Individual, "pitax").unwrap(), k * before, max_relative = 1e-12);
    assert_relative_eq!(sim.total_weight(EntityKind::Individual).unwrap(), k * weight_before);
}

#[test]
fn test_snapshot_round_trip() {
    let mut sim = simulation();
    sim.calc_all().unwrap();
    let before = state(sim.store(EntityKind::Corporate).unwrap());

    sim.store_snapshot(EntityKind::Corporate).unwrap();
    assert!(sim.has_snapshot());
    sim.set_array(EntityKind::Corporate, "PRFT_GAIN_BP_OTHR_SPECLTV_BUS", vec![9.0; 3]).unwrap();
    sim.set_array(EntityKind::Corporate, "LOSS_LAG2", vec![7.0; 3]).unwrap();
    sim.calc_all().unwrap();
    sim.restore_snapshot().unwrap();

    assert!(!sim.has_snapshot());
    assert_eq!(state(sim.store(EntityKind::Corporate).unwrap()), before);
}

#[test]
fn test_snapshot_is_single_slot() {
    let mut sim = simulation();
    let err = sim.restore_snapshot().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);

    sim.store_snapshot(EntityKind::Individual).unwrap();
    let err = sim.store_snapshot(EntityKind::Corporate).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);
}

#[test]
fn test_year_moves_refused_while_snapshot_outstanding() {
    let mut sim = simulation();
    sim.store_snapshot(EntityKind::Individual).unwrap();
    let err = sim.increment_year().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);
    let err = sim.advance_to_year(2019).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);
    let err = sim.set_year(2018).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);
    assert_eq!(sim.current_year(), 2017);
    assert_eq!(sim.data_year(EntityKind::Individual).unwrap(), 2017);

    sim.restore_snapshot().unwrap();
    sim.increment_year().unwrap();
    assert_eq!(sim.current_year(), 2018);
    assert_eq!(sim.store(EntityKind::Individual).unwrap().current_year(), 2018);
}

#[test]
fn test_restore_forces_recompute_of_other_populations() {
    let mut sim = simulation();
    sim.calc_all().unwrap();
    sim.store_snapshot(EntityKind::Individual).unwrap();
    sim.set_array(EntityKind::Corporate, "PRFT_GAIN_BP_OTHR_SPECLTV_BUS", vec![-50_000.0; 3])
        .unwrap();
    sim.restore_snapshot().unwrap();

    // closing balances must come from the changed corporate profits
    sim.increment_year().unwrap();
    let carried = corp(&sim, &loss_lag(1));
    assert_eq!(carried[0], 50_000.0);
    assert!(carried[1] > 50_000.0);
    assert!(carried[2] > 50_000.0);
}

fn flat_rate_simulation(rate: f64) -> Simulation {
    let mut policy = policy();
    for name in ["rate1", "rate2", "rate3", "rate4"] {
        policy.set(name, ParameterValue::Real(rate)).unwrap();
    }
    policy.set("std_deduction", ParameterValue::Real(0.0)).unwrap();
    policy.set("rebate_rate", ParameterValue::Real(0.0)).unwrap();
    policy.set("surcharge_rate", ParameterValue::Vector(vec![0.0; 3])).unwrap();
    policy.set("cess_rate", ParameterValue::Real(0.0)).unwrap();
    let store = load(
        EntityKind::Individual,
        vec![("AGEGRP", vec![0.0]), ("SALARIES", vec![800_000.0])],
        None,
    );
    SimulationBuilder::new(policy).individual(store).build().unwrap()
}

#[test]
fn test_flat_rate_marginal_rate() {
    let mut sim = flat_rate_simulation(0.2);
    let result = sim.marginal_rates(&MarginalRateRequest::default()).unwrap();
    assert_eq!(result.liability_column, "pitax");
    assert_relative_eq!(result.rates[0], 0.2, epsilon = 1e-6);

    let negative = MarginalRateRequest {
        negative_finite_diff: true,
        ..Default::default()
    };
    let result = sim.marginal_rates(&negative).unwrap();
    assert_relative_eq!(result.rates[0], 0.2, epsilon = 1e-6);

    // the analyzer leaves a clean baseline behind
    assert!(!sim.has_snapshot());
    assert_eq!(sim.array(EntityKind::Individual, "SALARIES").unwrap(), &[800_000.0]);
    assert_relative_eq!(sim.array(EntityKind::Individual, "pitax").unwrap()[0], 160_000.0, epsilon = 1e-6);
}

#[test]
fn test_marginal_rate_wrt_full_compensation() {
    let mut sim = flat_rate_simulation(0.2);
    sim.set_policy_param("payroll_ss_rate", ParameterValue::Real(0.10)).unwrap();
    sim.set_policy_param("payroll_mc_rate", ParameterValue::Real(0.02)).unwrap();
    let full = sim.marginal_rates(&MarginalRateRequest::default()).unwrap();
    assert_relative_eq!(full.rates[0], 0.2 / 1.06, epsilon = 1e-6);

    let wages_only = MarginalRateRequest {
        wrt_full_compensation: false,
        ..Default::default()
    };
    let result = sim.marginal_rates(&wages_only).unwrap();
    assert_relative_eq!(result.rates[0], 0.2, epsilon = 1e-6);
}

#[test]
fn test_marginal_rate_rejects_unknown_variable() {
    let mut sim = simulation();
    let request = MarginalRateRequest {
        kind: EntityKind::Corporate,
        variable: "SALARIES".to_string(),
        ..Default::default()
    };
    let err = sim.marginal_rates(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::SchemaViolation);
    assert!(!sim.has_snapshot());
}

#[test]
fn test_corporate_marginal_rate_moves_book_profit() {
    let mut sim = simulation();
    let request = MarginalRateRequest {
        kind: EntityKind::Corporate,
        variable: "PRFT_GAIN_BP_OTHR_SPECLTV_BUS".to_string(),
        ..Default::default()
    };
    let result = sim.marginal_rates(&request).unwrap();
    let policy = sim.policy();
    let mat_rate = policy.real("mat_rate").unwrap() * (1.0 + policy.real("cit_cess_rate").unwrap());
    // the third company pays MAT, so only the book profit change matters
    assert_relative_eq!(result.rates[2], mat_rate, epsilon = 1e-6);
    assert_eq!(corp(&sim, "DEEMED_TI_SEC115JB"), vec![0.0, 0.0, 2_000_000.0]);
}

#[test]
fn test_reform_value_holds_until_superseded() {
    let mut sim = simulation();
    let baseline = sim.policy_param_at("rate4", 2020).unwrap().clone();
    let reform = Reform::from_json_text(r#"{"policy": {"2021": {"rate4": 0.25}}}"#).unwrap();
    sim.implement_reform(&reform).unwrap();

    assert_eq!(sim.policy_param_at("rate4", 2020).unwrap(), &baseline);
    for year in 2021..=2030 {
        assert_eq!(sim.policy_param_at("rate4", year).unwrap(), &ParameterValue::Real(0.25));
    }
    sim.advance_to_year(2021).unwrap();
    assert_eq!(sim.policy_param("rate4").unwrap(), &ParameterValue::Real(0.25));
}

#[test]
fn test_builder_rejects_mismatched_years() {
    let ds = Dataset::from_columns(vec![("PRFT_GAIN_BP_OTHR_SPECLTV_BUS", vec![1.0])]).unwrap();
    let later = EntityStore::load(&ds, Schema::builtin(EntityKind::Corporate).unwrap(), 2018).unwrap();
    let err = SimulationBuilder::new(policy())
        .individual(individual())
        .corporate(later)
        .build()
        .err()
        .unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_builder_rejects_wrong_slot() {
    let err = SimulationBuilder::new(policy()).individual(corporate()).build().err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    let err = SimulationBuilder::new(policy()).build().err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_builder_catches_data_up_to_policy_year() {
    let gf = growth();
    let mut policy = policy();
    policy.set_year(2019).unwrap();
    let sim = SimulationBuilder::new(policy).individual(individual()).build().unwrap();
    assert_eq!(sim.current_year(), 2019);
    assert_eq!(sim.data_year(EntityKind::Individual).unwrap(), 2017);
    let factor = gf.factor_value("SALARY", 2018).unwrap() * gf.factor_value("SALARY", 2019).unwrap();
    assert_relative_eq!(sim.array(EntityKind::Individual, "SALARIES").unwrap()[0], 300_000.0 * factor, max_relative = 1e-12);
}

#[test]
fn test_year_desync_is_invariant_violation() {
    let mut sim = simulation();
    if let Some(population) = sim.individual.as_mut() {
        population.store.set_year(2018);
    }
    let err = sim.calc_all().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);
    let err = sim.increment_year().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvariantViolation);
}

#[test]
fn test_advance_range_errors() {
    let mut sim = simulation();
    sim.advance_to_year(2018).unwrap();
    assert_eq!(sim.advance_to_year(2017).unwrap_err().category(), ErrorCategory::Range);
    assert_eq!(sim.advance_to_year(2031).unwrap_err().category(), ErrorCategory::Range);
    assert_eq!(sim.current_year(), 2018);

    sim.advance_to_year(2030).unwrap();
    let before = state(sim.store(EntityKind::Individual).unwrap());
    assert_eq!(sim.increment_year().unwrap_err().category(), ErrorCategory::Range);
    assert_eq!(sim.current_year(), 2030);
    assert_eq!(state(sim.store(EntityKind::Individual).unwrap()), before);
}

#[test]
fn test_missing_weight_year_uses_uniform_weight() {
    let mut sim = simulation();
    sim.advance_to_year(2019).unwrap();
    // WT2018 sums to 176 over three records
    let weights = sim.array(EntityKind::Individual, WEIGHT_COLUMN).unwrap();
    for w in weights {
        assert_relative_eq!(*w, 176.0 / 3.0);
    }
}

#[test]
fn test_multi_year_totals_leave_simulation_unchanged() {
    let sim = simulation();
    let totals = sim
        .multi_year_totals(3, &[(EntityKind::Individual, "pitax"), (EntityKind::Consumption, "gst")])
        .unwrap();
    assert_eq!(totals.iter().map(|t| t.year).collect::<Vec<_>>(), vec![2017, 2018, 2019]);
    assert!(totals[0].totals["individual.pitax"] > 0.0);
    assert!(totals[2].totals.contains_key("consumption.gst"));
    assert_eq!(sim.current_year(), 2017);
    assert_eq!(sim.array(EntityKind::Individual, "pitax").unwrap(), &[0.0; 3]);

    assert_eq!(sim.multi_year_totals(0, &[]).unwrap_err().category(), ErrorCategory::Range);
    assert_eq!(sim.multi_year_totals(15, &[]).unwrap_err().category(), ErrorCategory::Range);
}

#[test]
fn test_set_year_relabels_everything() {
    let mut sim = simulation();
    sim.set_year(2020).unwrap();
    assert_eq!(sim.current_year(), 2020);
    assert_eq!(sim.array(EntityKind::Individual, "SALARIES").unwrap()[0], 300_000.0);
    assert_eq!(sim.array(EntityKind::Corporate, "ASSESSMENT_YEAR").unwrap(), &[2020.0; 3]);
    assert!(sim.set_year(2040).is_err());
}

#[test]
fn test_unknown_column_is_schema_violation() {
    let mut sim = simulation();
    let err = sim.array(EntityKind::Corporate, "SALARIES").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::SchemaViolation);
    let err = sim.set_array(EntityKind::Individual, "NO_SUCH_COLUMN", vec![0.0; 3]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::SchemaViolation);
    assert!(sim.table(EntityKind::Consumption, &["gst", "NOPE"]).is_err());
}
