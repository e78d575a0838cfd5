//! Homeroom rosters with parent contact columns.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::db::{Course, Database};
use crate::reports::{format_phone, ReportResult, ReportWriter, Templates};

#[derive(Debug, Serialize)]
struct ParentView {
    name: String,
    phone: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct StudentView {
    name: String,
    parents: Vec<ParentView>,
}

/// Roster heading from the homeroom's account id. Account ids carry the
/// grade after a two-letter campus code ("LSK", "LS3", "USJK").
fn roster_title(course: &Course) -> String {
    let grade = course
        .account_id
        .as_deref()
        .map(|id| if id.len() > 2 { &id[2..] } else { "" })
        .unwrap_or("");
    match grade {
        "JK" => "Junior Kindergarten".to_string(),
        "K" => "Kindergarten".to_string(),
        g if g.len() == 1
            && g.chars().all(|c| ('1'..='6').contains(&c))
            && !course.full_name.contains("Latin") =>
        {
            format!("Grade {g}")
        }
        _ => course.full_name.clone(),
    }
}

pub struct Rosters {
    db: Arc<Database>,
    templates: Templates,
}

impl Rosters {
    pub fn new(db: Arc<Database>) -> ReportResult<Self> {
        Ok(Self {
            db,
            templates: Templates::new()?,
        })
    }

    async fn course_roster(&self, course: &Course) -> ReportResult<String> {
        let teacher = self
            .db
            .course_teachers(&course.sis_id)
            .await?
            .into_iter()
            .next()
            .map(|t| t.teacher_name)
            .unwrap_or_else(|| "TBD".to_string());

        let mut students = Vec::new();
        for section in self.db.course_sections(&course.sis_id).await? {
            for student in self.db.section_students(&section.section_id).await? {
                let parents = self
                    .db
                    .student_parents(&student.sis_id)
                    .await?
                    .into_iter()
                    .map(|p| ParentView {
                        name: format!("{} {}", p.first_name, p.last_name),
                        phone: p.phone.as_deref().map(format_phone).unwrap_or_default(),
                        email: p.email.unwrap_or_default(),
                    })
                    .collect();
                students.push(StudentView {
                    name: format!("{} {}", student.common_name, student.last_name),
                    parents,
                });
            }
        }
        students.sort_by(|a, b| a.name.cmp(&b.name));

        let mut context = tera::Context::new();
        context.insert("title", &roster_title(course));
        context.insert("logo", "crest-report.png");
        context.insert("teacher", &teacher);
        context.insert("students", &students);
        self.templates.render("roster.html", &context)
    }

    /// One document with a roster per homeroom.
    pub async fn write_all(&self, writer: &ReportWriter, term_id: i64) -> ReportResult<PathBuf> {
        let mut bodies = Vec::new();
        let mut courses = self.db.homeroom_courses(term_id).await?;
        courses.sort_by(|a, b| a.sis_id.cmp(&b.sis_id));
        for course in &courses {
            bodies.push(self.course_roster(course).await?);
        }
        let html = self.templates.page("Rosters", "roster.css", &bodies)?;
        let path = writer.root().join("Rosters.html");
        writer.write_html(&path, &html)?;
        writer
            .to_pdf(&path, &writer.root().join("Rosters.pdf"))
            .await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(account: &str, full_name: &str) -> Course {
        Course {
            sis_id: "2025SMP03".to_string(),
            canvas_id: None,
            term_id: Some(1),
            full_name: full_name.to_string(),
            print_name: full_name.to_string(),
            account_id: Some(account.to_string()),
            standard_id: None,
            homeroom: true,
        }
    }

    #[test]
    fn titles_follow_account_grade() {
        assert_eq!(roster_title(&course("LSK", "Primary K")), "Kindergarten");
        assert_eq!(
            roster_title(&course("LSJK", "Primary JK")),
            "Junior Kindergarten"
        );
        assert_eq!(roster_title(&course("LS3", "Classical Studies 3")), "Grade 3");
        assert_eq!(roster_title(&course("LS3", "Latin 3")), "Latin 3");
        assert_eq!(roster_title(&course("US", "Rhetoric")), "Rhetoric");
    }
}
