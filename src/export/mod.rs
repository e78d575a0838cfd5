//! Spreadsheet output: XLSX exports from the cache and the Google
//! account CSV reconciliation.

pub mod accounts;
pub mod xlsx;

use rust_xlsxwriter::Workbook;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export data error: {0}")]
    Data(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// One worksheet of string cells, written out as its own workbook.
#[derive(Debug, Default)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn save(&self, path: &Path) -> ExportResult<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        // sheet names cap at 31 characters
        let name: String = self.name.chars().take(31).collect();
        worksheet.set_name(&name)?;
        for (col, header) in self.headers.iter().enumerate() {
            worksheet.write_string(0, col as u16, header)?;
        }
        for (row, cells) in self.rows.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                worksheet.write_string((row + 1) as u32, col as u16, cell)?;
            }
        }
        workbook.save(path)?;
        info!("Wrote {} ({} rows)", path.display(), self.rows.len());
        Ok(())
    }
}

/// Row filters shared by the XLSX exports.
#[derive(Debug, Clone)]
pub struct ExportFilter {
    pub id_prefix: String,
    pub grade_min: i32,
    pub grade_max: i32,
}

impl Default for ExportFilter {
    fn default() -> Self {
        Self {
            id_prefix: "s".to_string(),
            grade_min: -1,
            grade_max: 12,
        }
    }
}

impl ExportFilter {
    pub fn grades(mut self, min: i32, max: i32) -> Self {
        self.grade_min = min;
        self.grade_max = max;
        self
    }

    pub fn matches_grade(&self, grade: Option<i32>) -> bool {
        match grade {
            Some(g) => g >= self.grade_min && g <= self.grade_max,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_grade_bounds() {
        let filter = ExportFilter::default().grades(3, 12);
        assert!(filter.matches_grade(Some(3)));
        assert!(filter.matches_grade(Some(12)));
        assert!(!filter.matches_grade(Some(2)));
        assert!(!filter.matches_grade(None));
    }

    #[test]
    fn sheet_collects_rows() {
        let mut sheet = Sheet::new("students", &["id", "name"]);
        sheet.push(vec!["s101".to_string(), "Ada".to_string()]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.headers, vec!["id", "name"]);
    }
}
