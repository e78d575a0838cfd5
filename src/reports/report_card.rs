//! Report card assembly.
//!
//! Three layouts share the same bones: a heading, a grades table across
//! the cumulative periods, and an attendance table. The lower school
//! renames and reorders its courses and folds the language skills
//! courses into one computed composite.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::db::{Course, Database, GradeRecord, GradingPeriod, Student, Term};
use crate::grading;
use crate::reports::{ReportError, ReportResult, ReportWriter, Templates};

/// Which report card layout a student gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardVariant {
    /// Grades 7-12: course and teacher columns.
    Upper,
    /// Grades 3-6: fixed course order, composite Language Arts.
    Lower,
    /// Homeschool partner students ("c" ids): upper layout, own logo.
    Partner,
}

/// Lower-school course table: matched name, print name, sort order, and
/// whether the course folds into the Language Arts composite.
const LS_COURSES: &[(&str, &str, u32, bool)] = &[
    ("Math", "Arithmetic", 1, false),
    ("Latin", "Latin", 2, false),
    ("Literature", "Literature", 3, false),
    ("Language Arts", "Language Arts", 4, false),
    ("Spelling", "Spelling", 5, true),
    ("Penmanship", "Penmanship", 6, true),
    ("Grammar", "Grammar", 7, true),
    ("Composition", "Composition", 8, true),
    ("Geography", "Geography", 9, false),
    ("American Studies", "American Studies", 10, false),
    ("Classical Studies", "Classical Studies", 11, false),
    ("Christian Studies", "Christian Studies", 12, false),
    ("Science", "Science", 13, false),
    ("Art", "Art", 14, false),
    ("Choir", "Choir", 15, false),
    ("Music", "Music", 16, false),
    ("Physical Education", "PE", 17, false),
];

const LA_COMPOSITE_ORDER: u32 = 4;

/// Print name, order, and composite flag for a lower-school course.
/// Unknown courses sort to the end.
fn ls_rename(print_name: &str) -> (String, u32, bool) {
    for (name, renamed, order, composite) in LS_COURSES {
        if *name == print_name {
            return (renamed.to_string(), *order, *composite);
        }
    }
    for (name, renamed, order, composite) in LS_COURSES {
        if print_name.contains(name) {
            return (renamed.to_string(), *order, *composite);
        }
    }
    warn!("Course '{print_name}' is missing from the rename table");
    (print_name.to_string(), 100, false)
}

#[derive(Debug, Serialize)]
struct CardRow {
    course_name: String,
    teachers: Vec<String>,
    grades: Vec<String>,
    scores: Vec<String>,
    final_grade: String,
    final_score: String,
    comment: String,
    composite: bool,
    latest_score: String,
}

#[derive(Debug, Serialize)]
struct AttendanceView {
    absences: Vec<String>,
    tardies: Vec<String>,
    final_absences: String,
    final_tardies: String,
}

/// One course's raw records across the cumulative periods.
struct CourseRecords {
    course: Course,
    name: String,
    order: u32,
    composite: bool,
    teachers: Vec<String>,
    records: Vec<Option<GradeRecord>>,
    final_record: Option<GradeRecord>,
}

pub struct ReportCards {
    db: Arc<Database>,
    config: Arc<Config>,
    templates: Templates,
}

impl ReportCards {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> ReportResult<Self> {
        Ok(Self {
            db,
            config,
            templates: Templates::new()?,
        })
    }

    async fn gather_courses(
        &self,
        student: &Student,
        term: &Term,
        periods: &[GradingPeriod],
        final_mode: bool,
        lower: bool,
    ) -> ReportResult<Vec<CourseRecords>> {
        let courses = self.db.student_courses(&student.sis_id, term.term_id).await?;
        let homeroom_teacher = self
            .db
            .homeroom_teacher(&student.sis_id, term.term_id)
            .await?;

        let mut gathered = Vec::new();
        for course in courses {
            let mut records = Vec::new();
            for period in periods {
                records.push(
                    self.db
                        .grade_record(&student.sis_id, &course.sis_id, period.period_id, false)
                        .await?,
                );
            }
            let final_record = if final_mode {
                self.db
                    .final_grade_record(&student.sis_id, &course.sis_id, term.term_id)
                    .await?
            } else {
                None
            };
            let teachers = self.db.course_teachers(&course.sis_id).await?;

            let (mut name, order, composite) = if lower {
                ls_rename(&course.print_name)
            } else {
                (course.print_name.clone(), 0, false)
            };
            if lower {
                // lower-school rows skip the teacher column, but a teacher
                // other than the homeroom teacher rides along in the name
                for teacher in &teachers {
                    let is_homeroom = homeroom_teacher
                        .as_ref()
                        .map(|h| h.sis_id == teacher.sis_id)
                        .unwrap_or(false);
                    if !is_homeroom {
                        name = format!("{name} - {}", teacher.teacher_name);
                    }
                }
            }

            gathered.push(CourseRecords {
                name,
                order,
                composite,
                teachers: teachers.into_iter().map(|t| t.teacher_name).collect(),
                records,
                final_record,
                course,
            });
        }
        Ok(gathered)
    }

    fn record_row(rec: &CourseRecords, final_mode: bool) -> CardRow {
        let grades = rec
            .records
            .iter()
            .map(|r| {
                r.as_ref()
                    .and_then(|r| r.grade.clone())
                    .unwrap_or_default()
            })
            .collect();
        let scores: Vec<String> = rec
            .records
            .iter()
            .map(|r| grading::score_to_print(r.as_ref().and_then(|r| r.score)))
            .collect();
        let comment = rec
            .records
            .last()
            .and_then(|r| r.as_ref())
            .and_then(|r| r.comment.clone())
            .unwrap_or_default();
        let (final_grade, final_score) = if final_mode {
            match &rec.final_record {
                Some(r) => (
                    r.grade.clone().unwrap_or_default(),
                    grading::score_to_round(r.score),
                ),
                None => (String::new(), String::new()),
            }
        } else {
            (String::new(), String::new())
        };
        let latest_score = scores.last().cloned().unwrap_or_default();
        CardRow {
            course_name: rec.name.clone(),
            teachers: rec.teachers.clone(),
            grades,
            scores,
            final_grade,
            final_score,
            comment,
            composite: rec.composite,
            latest_score,
        }
    }

    /// The Language Arts composite: the mean of the composite courses'
    /// scores per period, lettered on the ten-point scale. A missing
    /// component score blanks the period.
    fn composite_row(components: &[&CourseRecords], final_mode: bool) -> CardRow {
        let period_count = components
            .first()
            .map(|c| c.records.len())
            .unwrap_or_default();
        let mut grades = Vec::new();
        let mut scores = Vec::new();
        for i in 0..period_count {
            let component_scores: Vec<Option<f64>> = components
                .iter()
                .map(|c| c.records[i].as_ref().and_then(|r| r.score))
                .collect();
            if component_scores.iter().all(Option::is_some) {
                let sum: f64 = component_scores.iter().flatten().sum();
                let mean = sum / component_scores.len() as f64;
                grades.push(grading::ten_point_letter(mean).to_string());
                scores.push(grading::score_to_print(Some(mean)));
            } else {
                grades.push(String::new());
                scores.push(String::new());
            }
        }
        let (final_grade, final_score) = if final_mode {
            let finals: Vec<Option<f64>> = components
                .iter()
                .map(|c| c.final_record.as_ref().and_then(|r| r.score))
                .collect();
            if finals.iter().all(Option::is_some) && !finals.is_empty() {
                let mean: f64 = finals.iter().flatten().sum::<f64>() / finals.len() as f64;
                (
                    grading::ten_point_letter(mean).to_string(),
                    grading::score_to_round(Some(mean)),
                )
            } else {
                (String::new(), String::new())
            }
        } else {
            (String::new(), String::new())
        };
        let latest_score = scores.last().cloned().unwrap_or_default();
        CardRow {
            course_name: "Language Arts".to_string(),
            teachers: Vec::new(),
            grades,
            scores,
            final_grade,
            final_score,
            comment: String::new(),
            composite: false,
            latest_score,
        }
    }

    async fn attendance_view(
        &self,
        student: &Student,
        periods: &[GradingPeriod],
    ) -> ReportResult<AttendanceView> {
        let mut absences = Vec::new();
        let mut tardies = Vec::new();
        let mut absence_total = 0.0;
        let mut tardy_total = 0i64;
        for period in periods {
            match self
                .db
                .attendance_for(&student.sis_id, period.period_id)
                .await?
            {
                Some(rec) => {
                    absences.push(grading::absences_to_print(rec.absences));
                    tardies.push(rec.tardies.to_string());
                    absence_total += rec.absences;
                    tardy_total += rec.tardies;
                }
                None => {
                    absences.push("0".to_string());
                    tardies.push("0".to_string());
                }
            }
        }
        Ok(AttendanceView {
            absences,
            tardies,
            final_absences: grading::absences_to_print(absence_total),
            final_tardies: tardy_total.to_string(),
        })
    }

    /// One student's report card as an HTML fragment.
    pub async fn student_card(
        &self,
        student: &Student,
        period: &GradingPeriod,
        final_mode: bool,
        variant: CardVariant,
    ) -> ReportResult<String> {
        let term = self
            .db
            .term_for_period(period)
            .await?
            .ok_or_else(|| ReportError::Data(format!("period {} has no term", period.period_id)))?;
        let periods = self.db.cumulative_periods(period).await?;
        let lower = variant == CardVariant::Lower;

        let mut courses = self
            .gather_courses(student, &term, &periods, final_mode, lower)
            .await?;

        let mut rows = Vec::new();
        if lower {
            let components: Vec<&CourseRecords> =
                courses.iter().filter(|c| c.composite).collect();
            let composite = if components.is_empty() {
                warn!(
                    "No language arts components for {} {}",
                    student.common_name, student.last_name
                );
                None
            } else {
                Some(Self::composite_row(&components, final_mode))
            };
            courses.sort_by_key(|c| c.order);
            let mut inserted = false;
            for rec in &courses {
                if !inserted && rec.order > LA_COMPOSITE_ORDER {
                    if let Some(row) = composite.as_ref() {
                        rows.push(Self::clone_row(row));
                        inserted = true;
                    }
                }
                rows.push(Self::record_row(rec, final_mode));
            }
            if !inserted {
                if let Some(row) = composite {
                    rows.push(row);
                }
            }
        } else {
            courses.sort_by(|a, b| a.course.sis_id.cmp(&b.course.sis_id));
            rows.extend(courses.iter().map(|rec| Self::record_row(rec, final_mode)));
        }

        let attendance = self.attendance_view(student, &periods).await?;
        let comments: Vec<String> = rows
            .iter()
            .filter(|r| !r.comment.is_empty())
            .map(|r| r.comment.clone())
            .collect();

        let grade_label = student
            .grade_level(self.config.grad_year())
            .map(grading::grade_label)
            .unwrap_or_default();
        let logo = match (variant, final_mode) {
            (CardVariant::Partner, _) => "partner-logo.jpg",
            (_, true) => "crest-final.png",
            (_, false) => "crest-report.png",
        };

        let mut context = tera::Context::new();
        context.insert(
            "student_name",
            &format!("{} {}", student.common_name, student.last_name),
        );
        context.insert("term_name", &term.term_name);
        context.insert("grade_label", &grade_label);
        context.insert("logo", logo);
        context.insert("final", &final_mode);
        context.insert(
            "period_headers",
            &(1..=periods.len())
                .map(|i| format!("T{i}"))
                .collect::<Vec<_>>(),
        );
        context.insert("rows", &rows);
        context.insert("attendance", &attendance);

        if lower {
            let homeroom_teacher = self
                .db
                .homeroom_teacher(&student.sis_id, term.term_id)
                .await?
                .map(|t| t.teacher_name)
                .unwrap_or_default();
            context.insert("homeroom_teacher", &homeroom_teacher);
            context.insert("comments", &comments);
            self.templates.render("report_card_ls.html", &context)
        } else {
            context.insert(
                "variant",
                if variant == CardVariant::Partner {
                    "partner"
                } else {
                    "upper"
                },
            );
            context.insert("show_attendance", &(variant != CardVariant::Partner));
            self.templates.render("report_card.html", &context)
        }
    }

    fn clone_row(row: &CardRow) -> CardRow {
        CardRow {
            course_name: row.course_name.clone(),
            teachers: row.teachers.clone(),
            grades: row.grades.clone(),
            scores: row.scores.clone(),
            final_grade: row.final_grade.clone(),
            final_score: row.final_score.clone(),
            comment: row.comment.clone(),
            composite: row.composite,
            latest_score: row.latest_score.clone(),
        }
    }

    /// Students who get this variant, ordered by last name.
    async fn variant_students(&self, variant: CardVariant) -> ReportResult<Vec<Student>> {
        let grad_year = self.config.grad_year();
        let students = match variant {
            CardVariant::Partner => self.db.active_students("c").await?,
            _ => self.db.active_students("s").await?,
        };
        Ok(students
            .into_iter()
            .filter(|s| match s.grade_level(grad_year) {
                Some(grade) => match variant {
                    CardVariant::Upper => grade >= 7,
                    CardVariant::Lower => (3..=6).contains(&grade),
                    CardVariant::Partner => true,
                },
                None => false,
            })
            .collect())
    }

    /// Write one batch document with every matching student's card, and
    /// a PDF beside it when wkhtmltopdf is available.
    pub async fn write_batch(
        &self,
        writer: &ReportWriter,
        period: &GradingPeriod,
        final_mode: bool,
        variant: CardVariant,
    ) -> ReportResult<PathBuf> {
        let term = self
            .db
            .term_for_period(period)
            .await?
            .ok_or_else(|| ReportError::Data(format!("period {} has no term", period.period_id)))?;
        let students = self.variant_students(variant).await?;

        let mut bodies = Vec::new();
        for student in &students {
            match self.student_card(student, period, final_mode, variant).await {
                Ok(body) => bodies.push(body),
                Err(e) => warn!(
                    "Skipping report card for {}: {e}",
                    student.sis_id
                ),
            }
        }

        let (title, stem) = match variant {
            CardVariant::Upper => ("Report Cards", "Report Cards"),
            CardVariant::Lower => ("LS Report Cards", "LS Report Cards"),
            CardVariant::Partner => ("Partner Report Cards", "Partner Report Cards"),
        };
        let html = self.templates.page(title, "progressreport.css", &bodies)?;
        let dir = writer.period_dir(&term.term_name, &period.period_name)?;
        let html_path = dir.join(format!("{stem}.html"));
        writer.write_html(&html_path, &html)?;
        writer
            .to_pdf(&html_path, &dir.join(format!("{stem}.pdf")))
            .await?;
        Ok(html_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_table_lookup() {
        assert_eq!(ls_rename("Math"), ("Arithmetic".to_string(), 1, false));
        assert_eq!(ls_rename("Spelling"), ("Spelling".to_string(), 5, true));
        // substring fallback
        assert_eq!(
            ls_rename("Penmanship 4"),
            ("Penmanship".to_string(), 6, true)
        );
        assert_eq!(ls_rename("Robotics"), ("Robotics".to_string(), 100, false));
    }
}
