use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cached student record. The SIS id is the primary key so historical rows
/// without a Canvas id can coexist with live ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub sis_id: String,
    pub canvas_id: Option<i64>,
    pub common_name: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<String>,
    pub graduation_year: Option<i32>,
    pub house: Option<String>,
    pub active: bool,
    pub password: Option<String>,
    pub email: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Student {
    /// Integer grade level for the configured senior class year.
    pub fn grade_level(&self, current_grad_year: i32) -> Option<i32> {
        self.graduation_year
            .map(|gy| crate::grading::grade_level(gy, current_grad_year))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parent {
    pub crm_id: String,
    pub canvas_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Teacher {
    pub sis_id: String,
    pub canvas_id: Option<i64>,
    pub teacher_name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradingPeriodGroup {
    pub gp_group_id: i64,
    pub gp_group_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Term {
    pub term_id: i64,
    pub term_name: String,
    pub gp_group_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradingPeriod {
    pub period_id: i64,
    pub period_name: String,
    pub gp_group_id: Option<i64>,
    /// Custom gradebook column holding end-of-period comments.
    pub note_column: Option<String>,
    /// Custom gradebook column holding midterm comments.
    pub midterm_column: Option<String>,
}

impl GradingPeriod {
    pub fn comment_column(&self, midterm: bool) -> Option<&str> {
        if midterm {
            self.midterm_column.as_deref()
        } else {
            self.note_column.as_deref()
        }
    }

    /// Default comment column name: first letter + first digit of the
    /// period name + "Comments", with an "M" for midterms
    /// ("Trimester 2" -> "T2Comments" / "T2M Comments").
    pub fn default_comment_column(&self, midterm: bool) -> String {
        let letter = self
            .period_name
            .chars()
            .find(|c| c.is_ascii_alphabetic())
            .unwrap_or('P');
        let digit = self
            .period_name
            .chars()
            .find(|c| c.is_ascii_digit())
            .unwrap_or('1');
        if midterm {
            format!("{letter}{digit}M Comments")
        } else {
            format!("{letter}{digit}Comments")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub sis_id: String,
    pub canvas_id: Option<i64>,
    pub term_id: Option<i64>,
    pub full_name: String,
    pub print_name: String,
    pub account_id: Option<String>,
    pub standard_id: Option<i64>,
    pub homeroom: bool,
}

impl Course {
    /// Guess whether the course is a homeroom from its name or SIS id
    /// (primary-school ids carry a 'P' in position 7).
    pub fn guess_homeroom(&self) -> bool {
        self.full_name.contains("Classical Studies")
            || self.full_name.contains("Classical Christian Studies")
            || self.sis_id.chars().nth(6) == Some('P')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub section_id: String,
    pub section_name: String,
    pub course_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeRecord {
    pub id: Option<i64>,
    pub student_id: String,
    /// Set for trimester/period records.
    pub period_id: Option<i64>,
    /// Set for final (whole-term) records.
    pub term_id: Option<i64>,
    pub course_id: String,
    pub score: Option<f64>,
    pub grade: Option<String>,
    pub comment: Option<String>,
    pub quality_points: Option<f64>,
    pub midterm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attendance {
    pub student_id: String,
    pub period_id: i64,
    /// Half-day absences count 0.5.
    pub absences: f64,
    pub tardies: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub canvas_id: i64,
    pub sis_id: Option<String>,
    pub account_name: String,
    pub parent_account_id: Option<i64>,
    pub root_account_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradingStandard {
    pub standard_id: i64,
    pub standard_title: String,
    /// Letter -> lower cutoff, as returned by Canvas.
    pub grading_scheme: HashMap<String, f64>,
}

/// CiviCRM custom-field map entry: translates the label shown in the CRM
/// UI ("Student ID", "Grad Year") into the `custom_<id>` API field name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrmField {
    pub id: i64,
    pub name: String,
    pub label: String,
    pub column_name: String,
}

impl CrmField {
    pub fn api_name(&self) -> String {
        format!("custom_{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_column_names() {
        let period = GradingPeriod {
            period_id: 1,
            period_name: "Trimester 2".to_string(),
            gp_group_id: Some(1),
            note_column: None,
            midterm_column: None,
        };
        assert_eq!(period.default_comment_column(false), "T2Comments");
        assert_eq!(period.default_comment_column(true), "T2M Comments");
    }

    #[test]
    fn homeroom_guess() {
        let mut course = Course {
            sis_id: "2025SMPJK".to_string(),
            canvas_id: None,
            term_id: None,
            full_name: "Primary JK".to_string(),
            print_name: "Primary JK".to_string(),
            account_id: None,
            standard_id: None,
            homeroom: false,
        };
        assert!(course.guess_homeroom());

        course.sis_id = "2025SMU07".to_string();
        course.full_name = "Classical Studies 7".to_string();
        assert!(course.guess_homeroom());

        course.full_name = "Algebra I".to_string();
        assert!(!course.guess_homeroom());
    }

    #[test]
    fn crm_field_api_name() {
        let field = CrmField {
            id: 73,
            name: "student_id".into(),
            label: "Student ID".into(),
            column_name: "student_id_73".into(),
        };
        assert_eq!(field.api_name(), "custom_73");
    }
}
