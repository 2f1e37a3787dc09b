//! Corporate carryforward ledger
//!
//! Three kinds of state survive from one assessment year to the next:
//! unabsorbed business losses, the written-down value of each depreciation
//! block, and unused MAT credit. Opening balances live in ledger columns of
//! the corporate store; each year's stages write the closing balances into
//! calculated columns. Advancing a year snapshots the closing side, moves the
//! store forward, then writes the snapshot into next year's opening side.

use crate::error::{SimError, SimResult};
use crate::records::{ColumnId, ColumnRole, EntityStore, Schema};

/// Years an unabsorbed loss stays on the ledger
pub const LOSS_SLOTS: usize = 8;

/// Years unused MAT credit stays on the ledger
pub const MAT_CREDIT_SLOTS: usize = 15;

/// Depreciation blocks, labelled by rate
pub const DEPRECIATION_BLOCKS: [&str; 7] = ["15P", "30P", "40P", "50P", "60P", "80P", "100P"];

pub fn loss_lag(slot: usize) -> String {
    format!("LOSS_LAG{slot}")
}

pub fn loss_close(slot: usize) -> String {
    format!("LOSS_CLOSE{slot}")
}

pub fn mat_lag(slot: usize) -> String {
    format!("MAT_LAG{slot}")
}

pub fn mat_close(slot: usize) -> String {
    format!("MAT_CLOSE{slot}")
}

pub fn opening_wdv(block: &str) -> String {
    format!("PWR_DOWN_VAL_1ST_DAY_PY_{block}")
}

pub fn closing_wdv(block: &str) -> String {
    format!("close_wdv_{block}")
}

pub const NEW_LOSS: &str = "LOSS_NEW";
pub const NEW_MAT_CREDIT: &str = "NEW_MAT_CREDIT";

/// Aged balances: slot 1 holds the newest contribution
#[derive(Debug, Clone)]
pub struct SlotChain<const N: usize> {
    opening: [ColumnId; N],
    closing: [ColumnId; N],
    newest: ColumnId,
}

#[derive(Debug, Clone, PartialEq)]
struct ChainSnapshot {
    newest: Vec<f64>,
    carried: Vec<Vec<f64>>,
}

impl<const N: usize> SlotChain<N> {
    fn bind(
        schema: &Schema,
        opening: impl Fn(usize) -> String,
        closing: impl Fn(usize) -> String,
        newest: &str,
    ) -> SimResult<Self> {
        Ok(Self {
            opening: bind_array(schema, (1..=N).map(&opening), true)?,
            closing: bind_array(schema, (1..=N).map(&closing), false)?,
            newest: bind_one(schema, newest, false)?,
        })
    }

    pub fn opening(&self) -> &[ColumnId; N] {
        &self.opening
    }

    pub fn closing(&self) -> &[ColumnId; N] {
        &self.closing
    }

    pub fn newest(&self) -> ColumnId {
        self.newest
    }

    /// Everything that moves into next year; the oldest slot is dropped
    fn snapshot(&self, store: &EntityStore) -> ChainSnapshot {
        ChainSnapshot {
            newest: store.column(self.newest).to_vec(),
            carried: self.closing[..N - 1]
                .iter()
                .map(|id| store.column(*id).to_vec())
                .collect(),
        }
    }

    fn shift_into(&self, store: &mut EntityStore, snapshot: ChainSnapshot) -> SimResult<()> {
        store.set(self.opening[0], snapshot.newest)?;
        for (slot, values) in self.opening[1..].iter().zip(snapshot.carried) {
            store.set(*slot, values)?;
        }
        Ok(())
    }
}

/// Per-block balances where closing becomes next year's opening
#[derive(Debug, Clone)]
pub struct BlockBalances<const N: usize> {
    opening: [ColumnId; N],
    closing: [ColumnId; N],
}

impl<const N: usize> BlockBalances<N> {
    fn bind(schema: &Schema, blocks: &[&str; N]) -> SimResult<Self> {
        Ok(Self {
            opening: bind_array(schema, blocks.iter().map(|b| opening_wdv(b)), true)?,
            closing: bind_array(schema, blocks.iter().map(|b| closing_wdv(b)), false)?,
        })
    }

    pub fn opening(&self) -> &[ColumnId; N] {
        &self.opening
    }

    pub fn closing(&self) -> &[ColumnId; N] {
        &self.closing
    }

    fn snapshot(&self, store: &EntityStore) -> Vec<Vec<f64>> {
        self.closing.iter().map(|id| store.column(*id).to_vec()).collect()
    }

    fn shift_into(&self, store: &mut EntityStore, snapshot: Vec<Vec<f64>>) -> SimResult<()> {
        for (block, values) in self.opening.iter().zip(snapshot) {
            store.set(*block, values)?;
        }
        Ok(())
    }
}

/// Closing balances captured between calculation and the year advance
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    losses: ChainSnapshot,
    wdv: Vec<Vec<f64>>,
    mat_credit: ChainSnapshot,
}

/// Typed view of the carryforward columns of a corporate schema
#[derive(Debug, Clone)]
pub struct CarryforwardLedger {
    losses: SlotChain<LOSS_SLOTS>,
    wdv: BlockBalances<7>,
    mat_credit: SlotChain<MAT_CREDIT_SLOTS>,
}

impl CarryforwardLedger {
    /// Resolve every ledger column; opening balances must be ledger columns
    /// and closing balances changing calculated columns
    pub fn bind(schema: &Schema) -> SimResult<Self> {
        Ok(Self {
            losses: SlotChain::bind(schema, loss_lag, loss_close, NEW_LOSS)?,
            wdv: BlockBalances::bind(schema, &DEPRECIATION_BLOCKS)?,
            mat_credit: SlotChain::bind(schema, mat_lag, mat_close, NEW_MAT_CREDIT)?,
        })
    }

    pub fn losses(&self) -> &SlotChain<LOSS_SLOTS> {
        &self.losses
    }

    pub fn wdv(&self) -> &BlockBalances<7> {
        &self.wdv
    }

    pub fn mat_credit(&self) -> &SlotChain<MAT_CREDIT_SLOTS> {
        &self.mat_credit
    }

    pub fn snapshot(&self, store: &EntityStore) -> LedgerSnapshot {
        LedgerSnapshot {
            losses: self.losses.snapshot(store),
            wdv: self.wdv.snapshot(store),
            mat_credit: self.mat_credit.snapshot(store),
        }
    }

    /// Write a snapshot into the opening balances of the store's current year
    pub fn restore_shift(&self, store: &mut EntityStore, snapshot: LedgerSnapshot) -> SimResult<()> {
        self.losses.shift_into(store, snapshot.losses)?;
        self.wdv.shift_into(store, snapshot.wdv)?;
        self.mat_credit.shift_into(store, snapshot.mat_credit)?;
        Ok(())
    }
}

fn bind_one(schema: &Schema, name: &str, opening: bool) -> SimResult<ColumnId> {
    let id = schema
        .id(name)
        .ok_or_else(|| SimError::config(format!("{} schema has no ledger column {name}", schema.entity())))?;
    let role = &schema.spec(id).role;
    let ok = if opening {
        *role == ColumnRole::Ledger
    } else {
        *role == ColumnRole::Calculated { changing: true }
    };
    if !ok {
        let wanted = if opening { "a ledger" } else { "a changing calculated" };
        return Err(SimError::config(format!("{name} must be {wanted} column")));
    }
    Ok(id)
}

fn bind_array<const N: usize>(
    schema: &Schema,
    names: impl Iterator<Item = String>,
    opening: bool,
) -> SimResult<[ColumnId; N]> {
    let ids = names
        .map(|name| bind_one(schema, &name, opening))
        .collect::<SimResult<Vec<_>>>()?;
    let found = ids.len();
    ids.try_into()
        .map_err(|_| SimError::config(format!("expected {N} ledger columns, found {found}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Dataset, EntityKind};

    fn corporate_store() -> EntityStore {
        let schema = Schema::builtin(EntityKind::Corporate).unwrap();
        let ds = Dataset::from_columns(vec![
            ("PRFT_GAIN_BP_OTHR_SPECLTV_BUS", vec![0.0, 0.0]),
            ("LOSS_LAG1", vec![11.0, 12.0]),
            ("MAT_LAG15", vec![5.0, 5.0]),
        ])
        .unwrap();
        EntityStore::load(&ds, schema, 2017).unwrap()
    }

    #[test]
    fn test_bind_corporate_schema() {
        let store = corporate_store();
        let ledger = CarryforwardLedger::bind(store.schema()).unwrap();
        assert_eq!(ledger.losses().opening().len(), LOSS_SLOTS);
        assert_eq!(ledger.mat_credit().closing().len(), MAT_CREDIT_SLOTS);
        assert_eq!(store.schema().name(ledger.wdv().opening()[6]), "PWR_DOWN_VAL_1ST_DAY_PY_100P");
    }

    #[test]
    fn test_bind_rejects_other_schemas() {
        let schema = Schema::builtin(EntityKind::Individual).unwrap();
        assert!(CarryforwardLedger::bind(&schema).is_err());
    }

    #[test]
    fn test_shift_moves_each_slot_one_year() {
        let mut store = corporate_store();
        let ledger = CarryforwardLedger::bind(store.schema()).unwrap();
        store.set_by_name(NEW_LOSS, vec![100.0, 200.0]).unwrap();
        for slot in 1..=LOSS_SLOTS {
            store.set_by_name(&loss_close(slot), vec![slot as f64; 2]).unwrap();
        }
        store.set_by_name(&closing_wdv("40P"), vec![60.0, 70.0]).unwrap();
        store.set_by_name(&mat_close(MAT_CREDIT_SLOTS), vec![9.0, 9.0]).unwrap();
        store.set_by_name(NEW_MAT_CREDIT, vec![3.0, 4.0]).unwrap();

        let snapshot = ledger.snapshot(&store);
        store.zero_changing_calculated();
        ledger.restore_shift(&mut store, snapshot).unwrap();

        assert_eq!(store.column_by_name("LOSS_LAG1").unwrap(), &[100.0, 200.0]);
        for slot in 2..=LOSS_SLOTS {
            let expected = (slot - 1) as f64;
            assert_eq!(store.column_by_name(&loss_lag(slot)).unwrap(), &[expected; 2]);
        }
        assert_eq!(store.column_by_name(&opening_wdv("40P")).unwrap(), &[60.0, 70.0]);
        assert_eq!(store.column_by_name(&opening_wdv("15P")).unwrap(), &[0.0, 0.0]);
        assert_eq!(store.column_by_name("MAT_LAG1").unwrap(), &[3.0, 4.0]);
        // the oldest credit slot is forfeited
        assert_eq!(store.column_by_name("MAT_LAG15").unwrap(), &[0.0, 0.0]);
    }
}
