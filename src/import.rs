//! CSV imports: attendance counts and the course creation sheet.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::canvas::{CanvasError, CanvasPush};
use crate::db::{Attendance, Database, DatabaseError, GradingPeriod, Term};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Canvas error: {0}")]
    Canvas(#[from] CanvasError),

    #[error("Import data error: {0}")]
    Data(String),
}

pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Counts {
    absences: f64,
    tardies: i64,
}

/// Tally one lowercased status mark. Half-day statuses carry a `_1`
/// suffix and count half an absence.
fn tally(counts: &mut Counts, status: &str) {
    if status == "absent" {
        counts.absences += 1.0;
    } else if status.ends_with("_1") {
        counts.absences += 0.5;
    } else if status == "tardy" {
        counts.tardies += 1;
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> ImportResult<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| ImportError::Data(format!("missing '{name}' column")))
}

/// Read an `ID,STATUS` attendance sheet and replace the period's counts.
/// Rows whose id does not start with 's' are not students and are skipped.
pub async fn import_attendance(
    db: &Arc<Database>,
    period: &GradingPeriod,
    path: &Path,
) -> ImportResult<usize> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let id_col = column_index(&headers, "ID")?;
    let status_col = column_index(&headers, "STATUS")?;

    let mut counts: BTreeMap<String, Counts> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let id = record
            .get(id_col)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let status = record
            .get(status_col)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !id.starts_with('s') {
            continue;
        }
        tally(counts.entry(id).or_default(), &status);
    }

    db.delete_attendance_for_period(period.period_id).await?;
    let mut imported = 0;
    for (student_id, count) in &counts {
        db.upsert_attendance(&Attendance {
            student_id: student_id.clone(),
            period_id: period.period_id,
            absences: count.absences,
            tardies: count.tardies,
        })
        .await?;
        imported += 1;
    }
    info!(
        "Imported attendance for {imported} students into {}",
        period.period_name
    );
    Ok(imported)
}

/// One row of the course creation sheet.
#[derive(Debug)]
struct CourseRow {
    course_id: String,
    print_name: String,
    full_name: String,
    account: String,
    grading_standard: String,
    action: String,
}

/// Read a `course_id,print_name,full_name,account,grading_standard,action`
/// sheet and create the `create`-flagged courses in Canvas under the given
/// term. Rows that fail are logged and skipped.
pub async fn import_courses(
    db: &Arc<Database>,
    push: &CanvasPush,
    term: &Term,
    path: &Path,
) -> ImportResult<usize> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let cols = [
        column_index(&headers, "course_id")?,
        column_index(&headers, "print_name")?,
        column_index(&headers, "full_name")?,
        column_index(&headers, "account")?,
        column_index(&headers, "grading_standard")?,
        column_index(&headers, "action")?,
    ];

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |i: usize| record.get(cols[i]).unwrap_or_default().trim().to_string();
        rows.push(CourseRow {
            course_id: cell(0),
            print_name: cell(1),
            full_name: cell(2),
            account: cell(3),
            grading_standard: cell(4),
            action: cell(5),
        });
    }
    info!("{} entries in {}", rows.len(), path.display());

    let mut created = 0;
    for row in &rows {
        if !row.action.eq_ignore_ascii_case("create") {
            continue;
        }
        match create_one(db, push, term, row).await {
            Ok(()) => created += 1,
            Err(e) => warn!("Could not process course {}: {e}", row.course_id),
        }
    }
    Ok(created)
}

async fn create_one(
    db: &Arc<Database>,
    push: &CanvasPush,
    term: &Term,
    row: &CourseRow,
) -> ImportResult<()> {
    let print_name = if row.print_name.is_empty() {
        &row.full_name
    } else {
        &row.print_name
    };
    let standard_id = if row.grading_standard.is_empty() {
        None
    } else {
        Some(
            db.standard_by_title(&row.grading_standard)
                .await?
                .ok_or_else(|| {
                    ImportError::Data(format!("unknown grading standard '{}'", row.grading_standard))
                })?
                .standard_id,
        )
    };
    let account_id = db
        .account_by_name(&row.account)
        .await?
        .ok_or_else(|| ImportError::Data(format!("unknown account '{}'", row.account)))?
        .canvas_id;
    push.create_course(
        &row.course_id,
        &row.full_name,
        print_name,
        account_id,
        term,
        standard_id,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tally() {
        let mut counts = Counts::default();
        tally(&mut counts, "absent");
        tally(&mut counts, "absent");
        tally(&mut counts, "absent_1");
        tally(&mut counts, "tardy");
        tally(&mut counts, "present");
        assert_eq!(counts.absences, 2.5);
        assert_eq!(counts.tardies, 1);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = csv::StringRecord::from(vec!["id", "Status"]);
        assert_eq!(column_index(&headers, "ID").unwrap(), 0);
        assert_eq!(column_index(&headers, "STATUS").unwrap(), 1);
        assert!(column_index(&headers, "DATE").is_err());
    }
}
