//! Column projections of an entity store

use std::io;

use crate::error::SimResult;

/// Named columns copied out of a store, all of the same length
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Table {
    pub(crate) fn new(names: Vec<String>, columns: Vec<Vec<f64>>) -> Self {
        Self { names, columns }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Write as CSV with a header row
    pub fn write_csv<W: io::Write>(&self, writer: W) -> SimResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.names)?;
        for row in 0..self.rows() {
            wtr.write_record(self.columns.iter().map(|c| c[row].to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}
