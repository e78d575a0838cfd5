//! Serde views of the Canvas REST responses we consume.
//!
//! Only the fields the sync layer reads are declared; everything else in
//! the payload is ignored.

use serde::Deserialize;
use std::collections::HashMap;

/// One term from `accounts/:id/terms` (nested under `enrollment_terms`).
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentTerm {
    pub id: i64,
    pub name: String,
    pub grading_period_group_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentTermPage {
    pub enrollment_terms: Vec<EnrollmentTerm>,
}

/// One period from `accounts/:id/grading_periods` (nested under
/// `grading_periods`).
#[derive(Debug, Clone, Deserialize)]
pub struct GradingPeriodEntry {
    pub id: i64,
    pub title: String,
    pub grading_period_group_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GradingPeriodPage {
    pub grading_periods: Vec<GradingPeriodEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubAccount {
    pub id: i64,
    pub sis_account_id: Option<String>,
    pub name: String,
    pub parent_account_id: Option<i64>,
    pub root_account_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradingStandardEntry {
    pub id: i64,
    pub title: String,
    pub context_type: String,
    /// Canvas returns the scheme as a list of single-entry maps.
    #[serde(default)]
    pub grading_scheme: Vec<HashMap<String, f64>>,
}

impl GradingStandardEntry {
    pub fn scheme_map(&self) -> HashMap<String, f64> {
        let mut map = HashMap::new();
        for entry in &self.grading_scheme {
            for (letter, cutoff) in entry {
                map.insert(letter.clone(), *cutoff);
            }
        }
        map
    }
}

/// A user row from `accounts/:id/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasUser {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sortable_name: Option<String>,
    #[serde(default)]
    pub sis_user_id: Option<String>,
}

impl CanvasUser {
    /// Split "Last, First" into (first, last), falling back to the
    /// display name when the sortable form is missing.
    pub fn split_name(&self) -> (String, String) {
        if let Some(sortable) = &self.sortable_name {
            if let Some((last, first)) = sortable.split_once(", ") {
                return (first.to_string(), last.to_string());
            }
        }
        (self.name.clone(), String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourseAccount {
    pub sis_account_id: Option<String>,
}

/// A course row from `accounts/:id/courses?include[]=account`.
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasCourse {
    pub id: i64,
    pub name: String,
    pub course_code: String,
    pub enrollment_term_id: Option<i64>,
    #[serde(default)]
    pub sis_course_id: Option<String>,
    #[serde(default)]
    pub account: Option<CourseAccount>,
    #[serde(default)]
    pub grading_standard_id: Option<i64>,
}

/// A section row from `courses/:id/sections?include[]=students`.
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasSection {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sis_course_id: Option<String>,
    #[serde(default)]
    pub students: Option<Vec<CanvasUser>>,
}

/// Grade block inside an enrollment row. Canvas keeps both the running
/// score (blanks excluded) and the final score (blanks count zero).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrollmentGrades {
    #[serde(default)]
    pub current_score: Option<f64>,
    #[serde(default)]
    pub current_grade: Option<String>,
    #[serde(default)]
    pub final_score: Option<f64>,
    #[serde(default)]
    pub final_grade: Option<String>,
}

impl EnrollmentGrades {
    pub fn score(&self, zero_blanks: bool) -> Option<f64> {
        if zero_blanks {
            self.final_score
        } else {
            self.current_score
        }
    }

    pub fn grade(&self, zero_blanks: bool) -> Option<&str> {
        if zero_blanks {
            self.final_grade.as_deref()
        } else {
            self.current_grade.as_deref()
        }
    }
}

/// An enrollment row from `courses/:id/enrollments`.
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasEnrollment {
    pub user: CanvasUser,
    #[serde(default)]
    pub grades: EnrollmentGrades,
}

/// A custom gradebook column from `courses/:id/custom_gradebook_columns`.
#[derive(Debug, Clone, Deserialize)]
pub struct GradebookColumn {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub read_only: bool,
}

/// One cell of a custom gradebook column.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDatum {
    pub user_id: i64,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grading_scheme_flattens() {
        let entry: GradingStandardEntry = serde_json::from_value(serde_json::json!({
            "id": 5,
            "title": "Upper School",
            "context_type": "Account",
            "grading_scheme": [{"A": 0.895}, {"B+": 0.845}, {"F": 0.0}]
        }))
        .unwrap();
        let map = entry.scheme_map();
        assert_eq!(map.get("A"), Some(&0.895));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn sortable_name_splits() {
        let user: CanvasUser = serde_json::from_value(serde_json::json!({
            "id": 9,
            "name": "Jane Smith",
            "sortable_name": "Smith, Jane",
            "sis_user_id": "s1000042"
        }))
        .unwrap();
        assert_eq!(user.split_name(), ("Jane".to_string(), "Smith".to_string()));
    }

    #[test]
    fn grades_pick_score_set() {
        let grades = EnrollmentGrades {
            current_score: Some(92.1),
            current_grade: Some("A".into()),
            final_score: Some(88.0),
            final_grade: Some("B".into()),
        };
        assert_eq!(grades.score(false), Some(92.1));
        assert_eq!(grades.grade(true), Some("B"));
    }
}
