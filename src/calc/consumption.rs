//! Consumption tax stages
//!
//! One stage per consumption line item, then the total. Each item is taxed
//! at its element of the `gst_rate` vector, in the order of [`ITEMS`].

use super::{map_column, names, sum_columns, FnStage, Stage, StageContext};
use crate::error::{SimError, SimResult};

/// Consumption line items, parallel to the labels of `gst_rate`
pub const ITEMS: [&str; 6] = ["CEREAL", "PULSES", "MILK", "FUEL", "CLOTHING", "OTHER"];

pub fn consumption_column(item: &str) -> String {
    format!("CONS_{item}")
}

pub fn gst_column(item: &str) -> String {
    format!("gst_{item}")
}

pub fn stages() -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = ITEMS
        .iter()
        .enumerate()
        .map(|(index, item)| Box::new(ItemTax::new(index, item)) as Box<dyn Stage>)
        .collect();
    stages.push(Box::new(FnStage::new(
        "gst_liability",
        ITEMS.iter().map(|i| gst_column(i)).collect(),
        names(&["gst"]),
        gst_liability,
    )));
    stages
}

struct ItemTax {
    name: String,
    index: usize,
    base: String,
    tax: String,
}

impl ItemTax {
    fn new(index: usize, item: &str) -> Self {
        Self {
            name: format!("gst_{}", item.to_lowercase()),
            index,
            base: consumption_column(item),
            tax: gst_column(item),
        }
    }
}

impl Stage for ItemTax {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        vec![self.base.clone()]
    }

    fn writes(&self) -> Vec<String> {
        vec![self.tax.clone()]
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> SimResult<()> {
        let rate = ctx
            .policy()
            .vector("gst_rate")?
            .get(self.index)
            .copied()
            .ok_or_else(|| SimError::schema(format!("gst_rate has no rate for {}", self.base)))?;
        map_column(ctx, &self.base, &self.tax, |c| c * rate)
    }
}

fn gst_liability(ctx: &mut StageContext<'_>) -> SimResult<()> {
    let columns: Vec<String> = ITEMS.iter().map(|i| gst_column(i)).collect();
    let total = sum_columns(ctx, &columns)?;
    ctx.write("gst", total)
}
