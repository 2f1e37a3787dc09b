//! In-memory tabular input, column-major

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::{SimError, SimResult};

/// Numeric table as read from a CSV file
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    headers: Vec<String>,
    columns: Vec<Vec<f64>>,
    rows: usize,
}

impl Dataset {
    /// Read a CSV with a header row; every cell must parse as a number
    pub fn from_reader<R: io::Read>(reader: R) -> SimResult<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        check_unique(&headers)?;

        let mut columns = vec![Vec::new(); headers.len()];
        let mut rows = 0;
        for result in reader.records() {
            let record = result?;
            for (col, cell) in record.iter().enumerate() {
                let value: f64 = cell.parse().map_err(|_| {
                    SimError::schema(format!(
                        "column {} row {}: cannot parse '{cell}' as a number",
                        headers[col],
                        rows + 1
                    ))
                })?;
                columns[col].push(value);
            }
            rows += 1;
        }

        Ok(Self {
            headers,
            columns,
            rows,
        })
    }

    pub fn from_path(path: &Path) -> SimResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Build from named columns of equal length
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<f64>)>) -> SimResult<Self> {
        let (headers, columns): (Vec<String>, Vec<Vec<f64>>) =
            columns.into_iter().map(|(name, values)| (name.into(), values)).unzip();
        check_unique(&headers)?;
        let rows = columns.first().map_or(0, Vec::len);
        if let Some(pos) = columns.iter().position(|c| c.len() != rows) {
            return Err(SimError::config(format!(
                "column {} has {} rows, expected {rows}",
                headers[pos],
                columns[pos].len()
            )));
        }
        Ok(Self {
            headers,
            columns,
            rows,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.headers
            .iter()
            .position(|h| h == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.headers
            .iter()
            .zip(&self.columns)
            .map(|(h, c)| (h.as_str(), c.as_slice()))
    }
}

fn check_unique(headers: &[String]) -> SimResult<()> {
    let mut seen = HashSet::with_capacity(headers.len());
    for h in headers {
        if !seen.insert(h.as_str()) {
            return Err(SimError::config(format!("duplicate column {h}")));
        }
    }
    Ok(())
}
