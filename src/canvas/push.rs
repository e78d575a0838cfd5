//! Push operations: the handful of writes we make back to Canvas.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::canvas::client::{CanvasClient, CanvasError, CanvasResult, PER_PAGE};
use crate::canvas::types::{CanvasCourse, GradebookColumn};
use crate::config::Config;
use crate::db::{Course, Database, Student, Term};

/// Visibility of a comment column in the teacher gradebook. Columns are
/// opened for a comment window and locked down afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMode {
    /// Teachers can see and edit the column.
    Visible,
    /// Teachers can see the column but no longer edit it.
    Protected,
    /// The column is hidden from the gradebook entirely.
    Hidden,
}

impl ColumnMode {
    fn flags(self) -> (bool, bool) {
        // (hidden, read_only)
        match self {
            ColumnMode::Visible => (false, false),
            ColumnMode::Protected => (false, true),
            ColumnMode::Hidden => (true, true),
        }
    }
}

pub struct CanvasPush {
    client: CanvasClient,
    db: Arc<Database>,
    config: Arc<Config>,
}

impl CanvasPush {
    pub fn new(client: CanvasClient, db: Arc<Database>, config: Arc<Config>) -> Self {
        Self { client, db, config }
    }

    /// Update a student's name and email in Canvas, keyed by SIS id.
    /// When `add_missing` is set, students Canvas does not know yet are
    /// created instead.
    pub async fn push_student(&self, student: &Student, add_missing: bool) -> CanvasResult<()> {
        let params = [
            (
                "user[name]",
                format!("{} {}", student.common_name, student.last_name),
            ),
            ("user[short_name]", student.common_name.clone()),
            (
                "user[sortable_name]",
                format!("{}, {}", student.last_name, student.common_name),
            ),
            (
                "user[email]",
                student.email.clone().unwrap_or_default(),
            ),
        ];
        let path = format!("users/sis_user_id:{}", student.sis_id);
        match self.client.put_params::<Value>(&path, &params).await {
            Ok(body) => {
                if let Some(canvas_id) = body.get("id").and_then(Value::as_i64) {
                    self.db
                        .set_student_canvas_id(&student.sis_id, Some(canvas_id))
                        .await?;
                }
                Ok(())
            }
            Err(CanvasError::Api { status, .. })
                if status == reqwest::StatusCode::NOT_FOUND && add_missing =>
            {
                self.add_student(student).await
            }
            Err(e) => Err(e),
        }
    }

    /// Create a student account in Canvas with a Google login pseudonym.
    pub async fn add_student(&self, student: &Student) -> CanvasResult<()> {
        let email = student.email.clone().ok_or_else(|| {
            CanvasError::MissingField(format!("student {} has no email", student.sis_id))
        })?;
        let params = [
            (
                "user[name]",
                format!("{} {}", student.common_name, student.last_name),
            ),
            ("user[short_name]", student.common_name.clone()),
            (
                "user[sortable_name]",
                format!("{}, {}", student.last_name, student.common_name),
            ),
            ("user[skip_registration]", "true".to_string()),
            ("pseudonym[unique_id]", email),
            ("pseudonym[sis_user_id]", student.sis_id.clone()),
            (
                "pseudonym[authentication_provider_id]",
                "google".to_string(),
            ),
            ("enable_sis_reactivation", "true".to_string()),
        ];
        let path = format!("accounts/{}/users", self.config.root_account);
        let body: Value = self.client.post_params(&path, &params).await?;
        if let Some(canvas_id) = body.get("id").and_then(Value::as_i64) {
            self.db
                .set_student_canvas_id(&student.sis_id, Some(canvas_id))
                .await?;
        }
        info!("Created student {} in Canvas", student.sis_id);
        Ok(())
    }

    /// Push all active students, creating missing ones when asked.
    pub async fn push_students(&self, id_prefix: &str, add_missing: bool) -> CanvasResult<usize> {
        let students = self.db.active_students(id_prefix).await?;
        let mut pushed = 0;
        for student in &students {
            match self.push_student(student, add_missing).await {
                Ok(()) => pushed += 1,
                Err(e) => warn!("Failed to push student {}: {e}", student.sis_id),
            }
        }
        Ok(pushed)
    }

    /// Create a course in Canvas under an account, then cache it.
    pub async fn create_course(
        &self,
        sis_id: &str,
        full_name: &str,
        print_name: &str,
        account_id: i64,
        term: &Term,
        grading_standard_id: Option<i64>,
    ) -> CanvasResult<Course> {
        let mut params = vec![
            ("course[name]", full_name.to_string()),
            ("course[course_code]", print_name.to_string()),
            ("course[term_id]", term.term_id.to_string()),
            ("course[sis_course_id]", sis_id.to_string()),
        ];
        if let Some(standard) = grading_standard_id {
            params.push(("course[grading_standard_id]", standard.to_string()));
        }
        let path = format!("accounts/{account_id}/courses");
        let created: CanvasCourse = self.client.post_params(&path, &params).await?;

        let course = Course {
            sis_id: created.sis_course_id.unwrap_or_else(|| sis_id.to_string()),
            canvas_id: Some(created.id),
            term_id: created.enrollment_term_id,
            full_name: created.name,
            print_name: created.course_code,
            account_id: created.account.and_then(|a| a.sis_account_id),
            standard_id: grading_standard_id,
            homeroom: false,
        };
        let homeroom = course.guess_homeroom();
        self.db.upsert_course(&course).await?;
        self.db.set_course_homeroom(&course.sis_id, homeroom).await?;
        info!("Created course {} in Canvas", course.sis_id);
        Ok(course)
    }

    /// Create or reconfigure a comment column on one course, setting its
    /// visibility per the mode.
    pub async fn set_comment_column(
        &self,
        course: &Course,
        column_name: &str,
        mode: ColumnMode,
    ) -> CanvasResult<()> {
        let canvas_id = course.canvas_id.ok_or_else(|| {
            CanvasError::MissingField(format!("course {} has no Canvas id", course.sis_id))
        })?;
        let (hidden, read_only) = mode.flags();

        let list_path = format!(
            "courses/{canvas_id}/custom_gradebook_columns?include_hidden=true&per_page={PER_PAGE}"
        );
        let columns: Vec<GradebookColumn> = self.client.get_all(&list_path).await?;

        if let Some(column) = columns.iter().find(|c| c.title == column_name) {
            let path = format!(
                "courses/{canvas_id}/custom_gradebook_columns/{}",
                column.id
            );
            let params = [
                ("column[teacher_notes]", "false".to_string()),
                ("column[read_only]", read_only.to_string()),
                ("column[hidden]", hidden.to_string()),
            ];
            self.client.put_ok(&path, &params).await?;
            info!(
                "{column_name} for course '{}' set to read_only={read_only} hidden={hidden}",
                course.full_name
            );
        } else {
            let path = format!("courses/{canvas_id}/custom_gradebook_columns");
            let params = [
                ("column[teacher_notes]", "false".to_string()),
                ("column[read_only]", read_only.to_string()),
                ("column[title]", column_name.to_string()),
                ("column[hidden]", hidden.to_string()),
            ];
            let _: Value = self.client.post_params(&path, &params).await?;
            info!("Created {column_name} for course '{}'", course.full_name);
        }
        Ok(())
    }

    /// Hide grade distribution graphs from students for a course.
    pub async fn hide_stats(&self, course: &Course) -> CanvasResult<()> {
        let canvas_id = course.canvas_id.ok_or_else(|| {
            CanvasError::MissingField(format!("course {} has no Canvas id", course.sis_id))
        })?;
        let path = format!("courses/{canvas_id}/settings");
        let params = [("hide_distribution_graphs", "true".to_string())];
        self.client.put_ok(&path, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_mode_flags() {
        assert_eq!(ColumnMode::Visible.flags(), (false, false));
        assert_eq!(ColumnMode::Protected.flags(), (false, true));
        assert_eq!(ColumnMode::Hidden.flags(), (true, true));
    }
}
