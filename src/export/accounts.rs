//! Google account maintenance: password generation and reconciliation of
//! the admin-console user export against the cache.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{Database, Student};
use crate::export::{ExportError, ExportResult};

const EMAIL_COL: &str = "Email Address [Required]";
const ORG_UNIT_COL: &str = "Org Unit Path [Required]";
const STATUS_COL: &str = "New Status [UPLOAD ONLY]";
const PASSWORD_COL: &str = "Password [Required]";
const LAST_SIGN_IN_COL: &str = "Last Sign In [READ ONLY]";
const RECOVERY_EMAIL_COL: &str = "Recovery Email";
const SECONDARY_EMAIL_COL: &str = "Home Secondary Email";
const RECOVERY_PHONE_COL: &str = "Recovery Phone [MUST BE IN THE E.164 FORMAT]";

const OUTPUT_COLUMNS: &[&str] = &[
    "First Name [Required]",
    "Last Name [Required]",
    EMAIL_COL,
    PASSWORD_COL,
    ORG_UNIT_COL,
    RECOVERY_EMAIL_COL,
    SECONDARY_EMAIL_COL,
    RECOVERY_PHONE_COL,
    "Department",
    "Change Password at Next Sign-In",
    STATUS_COL,
    LAST_SIGN_IN_COL,
];

const STUDENT_ORG_UNIT: &str = "/School/Students";
const SUSPENDED_ORG_UNIT: &str = "/Suspended";

/// Random password from an alphabet without lookalike characters. Always
/// contains at least one digit.
pub fn gen_password(length: usize) -> String {
    const AMBIGUOUS: &[char] = &['I', '1', 'l', '0', 'O'];
    let alphabet: Vec<char> = ('a'..='z')
        .chain('A'..='Z')
        .chain('0'..='9')
        .chain("!@#$%^&*".chars())
        .filter(|c| !AMBIGUOUS.contains(c))
        .collect();
    let mut rng = rand::thread_rng();
    loop {
        let password: String = (0..length)
            .filter_map(|_| alphabet.choose(&mut rng))
            .collect();
        if password.chars().any(|c| c.is_ascii_digit()) {
            return password;
        }
    }
}

type CsvRow = HashMap<String, String>;

fn read_rows(path: &Path) -> ExportResult<Vec<CsvRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: CsvRow = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Reconcile a Google admin-console users.csv with the cache:
/// suspend accounts of inactive students, fill recovery contacts from the
/// first parent, set passwords for never-used accounts, and append rows
/// for active students missing from the export.
pub async fn reconcile_google_accounts(
    db: &Arc<Database>,
    input: &Path,
    output: &Path,
) -> ExportResult<usize> {
    let mut rows: Vec<CsvRow> = read_rows(input)?
        .into_iter()
        .filter(|row| row.get(ORG_UNIT_COL).map(String::as_str) == Some(STUDENT_ORG_UNIT))
        .collect();

    let students = db.all_students("").await?;
    let by_email: HashMap<String, Student> = students
        .iter()
        .filter_map(|s| s.email.clone().map(|e| (e, s.clone())))
        .collect();

    let mut seen = Vec::new();
    for row in &mut rows {
        let email = row.get(EMAIL_COL).cloned().unwrap_or_default();
        match by_email.get(&email).filter(|s| s.active) {
            None => {
                row.insert(STATUS_COL.to_string(), "Suspended".to_string());
                row.insert(ORG_UNIT_COL.to_string(), SUSPENDED_ORG_UNIT.to_string());
            }
            Some(student) => {
                seen.push(email.clone());
                let parent = db
                    .student_parents(&student.sis_id)
                    .await?
                    .into_iter()
                    .next();
                if let Some(parent) = &parent {
                    let parent_email = parent.email.clone().unwrap_or_default();
                    row.insert(RECOVERY_EMAIL_COL.to_string(), parent_email.clone());
                    row.insert(SECONDARY_EMAIL_COL.to_string(), parent_email);
                    if let Some(phone) = &parent.phone {
                        row.insert(RECOVERY_PHONE_COL.to_string(), format!("+1{phone}"));
                    }
                }
                if row.get(LAST_SIGN_IN_COL).map(String::as_str) == Some("Never logged in") {
                    row.insert(
                        PASSWORD_COL.to_string(),
                        student.password.clone().unwrap_or_default(),
                    );
                } else {
                    // the account is in use, stop holding the password
                    db.clear_student_password(&student.sis_id).await?;
                }
            }
        }
    }

    for student in students.iter().filter(|s| s.active) {
        let Some(email) = student.email.clone() else {
            warn!("Student {} has no email address", student.sis_id);
            continue;
        };
        if seen.contains(&email) {
            continue;
        }
        let parent = db
            .student_parents(&student.sis_id)
            .await?
            .into_iter()
            .next();
        let mut row = CsvRow::new();
        row.insert(
            "First Name [Required]".to_string(),
            student.common_name.clone(),
        );
        row.insert(
            "Last Name [Required]".to_string(),
            student.last_name.clone(),
        );
        row.insert(EMAIL_COL.to_string(), email.clone());
        row.insert(
            PASSWORD_COL.to_string(),
            student.password.clone().unwrap_or_default(),
        );
        row.insert(ORG_UNIT_COL.to_string(), STUDENT_ORG_UNIT.to_string());
        if let Some(parent) = &parent {
            let parent_email = parent.email.clone().unwrap_or_default();
            row.insert(RECOVERY_EMAIL_COL.to_string(), parent_email.clone());
            row.insert(SECONDARY_EMAIL_COL.to_string(), parent_email);
            if let Some(phone) = &parent.phone {
                row.insert(RECOVERY_PHONE_COL.to_string(), format!("+1{phone}"));
            }
        }
        if let Some(gy) = student.graduation_year {
            row.insert("Department".to_string(), (gy - 2000).to_string());
        }
        row.insert(
            "Change Password at Next Sign-In".to_string(),
            "True".to_string(),
        );
        row.insert(STATUS_COL.to_string(), "Active".to_string());
        info!("{email} added to account export");
        rows.push(row);
    }

    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(OUTPUT_COLUMNS)?;
    for row in &rows {
        let record: Vec<&str> = OUTPUT_COLUMNS
            .iter()
            .map(|col| row.get(*col).map(String::as_str).unwrap_or(""))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush().map_err(ExportError::Io)?;
    info!("Wrote {} ({} accounts)", output.display(), rows.len());
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_avoid_lookalikes_and_carry_a_digit() {
        for _ in 0..20 {
            let password = gen_password(8);
            assert_eq!(password.len(), 8);
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            for forbidden in ['I', '1', 'l', '0', 'O'] {
                assert!(!password.contains(forbidden));
            }
        }
    }
}
