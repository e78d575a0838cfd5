//! Family pickup slips: one per active parent, listing their enrolled
//! students with grade, campus, and homeroom teacher.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, Student, Term};
use crate::grading;
use crate::reports::{ReportResult, ReportWriter, Templates};

#[derive(Debug, Serialize)]
struct StudentView {
    name: String,
    grade: String,
    campus: String,
    teacher: String,
}

pub struct Slips {
    db: Arc<Database>,
    config: Arc<Config>,
    templates: Templates,
}

impl Slips {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> ReportResult<Self> {
        Ok(Self {
            db,
            config,
            templates: Templates::new()?,
        })
    }

    async fn student_view(&self, student: &Student, term: &Term) -> ReportResult<StudentView> {
        let grade = student
            .grade_level(self.config.grad_year())
            .map(grading::grade_label)
            .unwrap_or_default();
        let homeroom = self
            .db
            .student_courses(&student.sis_id, term.term_id)
            .await?
            .into_iter()
            .find(|c| c.homeroom);
        let campus = homeroom
            .as_ref()
            .map(|c| {
                if c.sis_id.len() >= 6 {
                    c.sis_id[4..6].to_string()
                } else {
                    String::new()
                }
            })
            .unwrap_or_default();
        let teacher = self
            .db
            .homeroom_teacher(&student.sis_id, term.term_id)
            .await?
            .map(|t| t.teacher_name)
            .unwrap_or_default();
        Ok(StudentView {
            name: format!("{} {}", student.common_name, student.last_name),
            grade,
            campus,
            teacher,
        })
    }

    /// One slip per family with at least one active student.
    pub async fn write_all(&self, writer: &ReportWriter, term: &Term) -> ReportResult<PathBuf> {
        let mut parents = self.db.active_parents().await?;
        parents.sort_by(|a, b| {
            (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name))
        });

        let mut bodies = Vec::new();
        for parent in &parents {
            let mut students: Vec<Student> = self
                .db
                .parent_students(&parent.crm_id)
                .await?
                .into_iter()
                .filter(|s| s.active)
                .collect();
            if students.is_empty() {
                continue;
            }
            // oldest students first
            students.sort_by_key(|s| s.graduation_year.unwrap_or(i32::MAX));

            let mut views = Vec::new();
            for student in &students {
                views.push(self.student_view(student, term).await?);
            }

            let mut context = tera::Context::new();
            context.insert(
                "family",
                &format!("{} {}", parent.first_name, parent.last_name),
            );
            context.insert("students", &views);
            bodies.push(self.templates.render("slip.html", &context)?);
        }

        let html = self.templates.page("Pickup Slips", "slip.css", &bodies)?;
        let path = writer.root().join("Pickup Slips.html");
        writer.write_html(&path, &html)?;
        writer
            .to_pdf(&path, &writer.root().join("Pickup Slips.pdf"))
            .await?;
        Ok(path)
    }
}
