//! Per-student course schedules for the upper school.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, Student, Term};
use crate::reports::{ReportResult, ReportWriter, Templates};

#[derive(Debug, Serialize)]
struct CourseView {
    name: String,
    teacher: String,
}

pub struct Schedules {
    db: Arc<Database>,
    config: Arc<Config>,
    templates: Templates,
}

impl Schedules {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> ReportResult<Self> {
        Ok(Self {
            db,
            config,
            templates: Templates::new()?,
        })
    }

    async fn student_schedule(&self, student: &Student, term: &Term) -> ReportResult<String> {
        let mut courses = self.db.student_courses(&student.sis_id, term.term_id).await?;
        courses.sort_by(|a, b| a.print_name.cmp(&b.print_name));

        let mut views = Vec::new();
        for course in &courses {
            let teacher = self
                .db
                .course_teachers(&course.sis_id)
                .await?
                .into_iter()
                .next()
                .map(|t| t.teacher_name)
                .unwrap_or_else(|| "TBD".to_string());
            views.push(CourseView {
                name: course.print_name.clone(),
                teacher,
            });
        }

        let mut context = tera::Context::new();
        context.insert(
            "student_name",
            &format!("{} {}", student.common_name, student.last_name),
        );
        context.insert("logo", "crest-report.png");
        context.insert("term_name", &term.term_name);
        context.insert("courses", &views);
        self.templates.render("schedule.html", &context)
    }

    /// Schedules for every enrolled upper-school student, one document.
    pub async fn write_all(&self, writer: &ReportWriter, term: &Term) -> ReportResult<PathBuf> {
        let grad_year = self.config.grad_year();
        let mut students: Vec<Student> = self
            .db
            .active_students("s")
            .await?
            .into_iter()
            .filter(|s| s.grade_level(grad_year).map(|g| g >= 7).unwrap_or(false))
            .collect();
        students.sort_by(|a, b| {
            (&a.last_name, &a.common_name).cmp(&(&b.last_name, &b.common_name))
        });

        let mut bodies = Vec::new();
        for student in &students {
            bodies.push(self.student_schedule(student, term).await?);
        }
        let html = self.templates.page("Schedules", "schedule.css", &bodies)?;
        let path = writer.root().join("Schedules.html");
        writer.write_html(&path, &html)?;
        writer
            .to_pdf(&path, &writer.root().join("Schedules.pdf"))
            .await?;
        Ok(path)
    }
}
