//! XLSX exports from the cache.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, GradingPeriod, Student, Term};
use crate::export::{accounts, ExportError, ExportFilter, ExportResult, Sheet};
use crate::grading;

const STUDENT_ORG_UNIT: &str = "/School/Students";

pub struct Exporter {
    db: Arc<Database>,
    config: Arc<Config>,
}

impl Exporter {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    fn grade_of(&self, student: &Student) -> Option<i32> {
        student.grade_level(self.config.grad_year())
    }

    async fn filtered_students(&self, filter: &ExportFilter) -> ExportResult<Vec<Student>> {
        Ok(self
            .db
            .active_students(&filter.id_prefix)
            .await?
            .into_iter()
            .filter(|s| filter.matches_grade(self.grade_of(s)))
            .collect())
    }

    async fn term_periods(&self, term: &Term) -> ExportResult<Vec<GradingPeriod>> {
        let group = term.gp_group_id.ok_or_else(|| {
            ExportError::Data(format!("term '{}' has no grading period group", term.term_name))
        })?;
        Ok(self.db.periods_in_group(group).await?)
    }

    /// Absence and tardy counts per student per period.
    pub async fn attendance(
        &self,
        term: &Term,
        filter: &ExportFilter,
        path: &Path,
    ) -> ExportResult<()> {
        let periods = self.term_periods(term).await?;
        let mut sheet = Sheet::new(
            &format!("attendance {}", term.term_name),
            &[
                "student_id",
                "common_name",
                "last_name",
                "grade_level",
                "absences",
                "tardies",
                "period_name",
            ],
        );
        for student in self.filtered_students(filter).await? {
            let grade = self.grade_of(&student).unwrap_or_default();
            for period in &periods {
                if let Some(rec) = self
                    .db
                    .attendance_for(&student.sis_id, period.period_id)
                    .await?
                {
                    sheet.push(vec![
                        student.sis_id.clone(),
                        student.common_name.clone(),
                        student.last_name.clone(),
                        grade.to_string(),
                        grading::absences_to_print(rec.absences),
                        rec.tardies.to_string(),
                        period.period_name.clone(),
                    ]);
                }
            }
        }
        sheet.save(path)
    }

    /// Class enrollment for the term, one row per student per section.
    pub async fn classes(
        &self,
        term: &Term,
        filter: &ExportFilter,
        homeroom_only: bool,
        path: &Path,
    ) -> ExportResult<()> {
        let mut sheet = Sheet::new(
            &term.term_name,
            &[
                "student_id",
                "common_name",
                "last_name",
                "grade_level",
                "section",
                "teacher_name",
            ],
        );
        for course in self.db.term_courses(term.term_id).await? {
            if homeroom_only && !course.homeroom {
                continue;
            }
            let teacher = self
                .db
                .course_teachers(&course.sis_id)
                .await?
                .into_iter()
                .next()
                .map(|t| t.teacher_name)
                .unwrap_or_default();
            for section in self.db.course_sections(&course.sis_id).await? {
                for student in self.db.section_students(&section.section_id).await? {
                    if !student.active
                        || !student.sis_id.starts_with(&filter.id_prefix)
                        || !filter.matches_grade(self.grade_of(&student))
                    {
                        continue;
                    }
                    sheet.push(vec![
                        student.sis_id.clone(),
                        student.common_name.clone(),
                        student.last_name.clone(),
                        self.grade_of(&student).unwrap_or_default().to_string(),
                        section.section_name.clone(),
                        teacher.clone(),
                    ]);
                }
            }
        }
        sheet.save(path)
    }

    /// Full grade export for a term: one column group per period plus the
    /// final record.
    pub async fn term_grades(
        &self,
        term: &Term,
        filter: &ExportFilter,
        path: &Path,
    ) -> ExportResult<()> {
        let periods = self.term_periods(term).await?;
        let mut headers = vec![
            "common_name".to_string(),
            "last_name".to_string(),
            "grade_level".to_string(),
            "course".to_string(),
            "course_short".to_string(),
            "teacher_name".to_string(),
        ];
        for period in &periods {
            headers.push(format!("{}_score", period.period_name));
            headers.push(format!("{}_grade", period.period_name));
            headers.push(format!("{}_comment", period.period_name));
        }
        headers.push("final_score".to_string());
        headers.push("final_grade".to_string());

        let mut sheet = Sheet {
            name: term.term_name.clone(),
            headers,
            rows: Vec::new(),
        };

        for student in self.filtered_students(filter).await? {
            let grade = self.grade_of(&student).unwrap_or_default();
            for course in self.db.student_courses(&student.sis_id, term.term_id).await? {
                let teacher = self
                    .db
                    .course_teachers(&course.sis_id)
                    .await?
                    .into_iter()
                    .next()
                    .map(|t| t.teacher_name)
                    .unwrap_or_default();
                let mut row = vec![
                    student.common_name.clone(),
                    student.last_name.clone(),
                    grade.to_string(),
                    course.full_name.clone(),
                    course.print_name.clone(),
                    teacher,
                ];
                for period in &periods {
                    let rec = self
                        .db
                        .grade_record(&student.sis_id, &course.sis_id, period.period_id, false)
                        .await?;
                    row.push(
                        rec.as_ref()
                            .and_then(|r| r.score)
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                    );
                    row.push(
                        rec.as_ref()
                            .and_then(|r| r.grade.clone())
                            .unwrap_or_default(),
                    );
                    row.push(
                        rec.as_ref()
                            .and_then(|r| r.comment.clone())
                            .unwrap_or_default(),
                    );
                }
                let final_rec = self
                    .db
                    .final_grade_record(&student.sis_id, &course.sis_id, term.term_id)
                    .await?;
                row.push(
                    final_rec
                        .as_ref()
                        .and_then(|r| r.score)
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                );
                row.push(
                    final_rec
                        .and_then(|r| r.grade)
                        .unwrap_or_default(),
                );
                sheet.push(row);
            }
        }
        sheet.save(path)
    }

    /// All grade records for one period.
    pub async fn period_grades(
        &self,
        period: &GradingPeriod,
        midterm: bool,
        filter: &ExportFilter,
        path: &Path,
    ) -> ExportResult<()> {
        let mut sheet = Sheet::new(
            &period.period_name,
            &[
                "student_id",
                "common_name",
                "last_name",
                "grade_level",
                "score",
                "grade",
                "comment",
                "course",
                "course_id",
            ],
        );
        for rec in self.db.period_records(period.period_id, midterm).await? {
            if !rec.student_id.starts_with(&filter.id_prefix) {
                continue;
            }
            let Some(student) = self.db.get_student(&rec.student_id).await? else {
                continue;
            };
            if !filter.matches_grade(self.grade_of(&student)) {
                continue;
            }
            let course_name = self
                .db
                .course_by_sis_id(&rec.course_id)
                .await?
                .map(|c| c.full_name)
                .unwrap_or_default();
            sheet.push(vec![
                student.sis_id.clone(),
                student.common_name.clone(),
                student.last_name.clone(),
                self.grade_of(&student).unwrap_or_default().to_string(),
                rec.score.map(|s| s.to_string()).unwrap_or_default(),
                rec.grade.clone().unwrap_or_default(),
                rec.comment.clone().unwrap_or_default(),
                course_name,
                rec.course_id.clone(),
            ]);
        }
        sheet.save(path)
    }

    /// Name, email, and stored password for the current student body.
    pub async fn students(&self, filter: &ExportFilter, path: &Path) -> ExportResult<()> {
        let mut sheet = Sheet::new(
            "students",
            &["student_id", "common_name", "last_name", "email", "password"],
        );
        for student in self.filtered_students(filter).await? {
            sheet.push(vec![
                student.sis_id.clone(),
                student.common_name.clone(),
                student.last_name.clone(),
                student.email.clone().unwrap_or_default(),
                student.password.clone().unwrap_or_default(),
            ]);
        }
        sheet.save(path)
    }

    /// Google-import sheet for student accounts. Missing passwords are
    /// generated and stored before the export.
    pub async fn student_accounts(
        &self,
        filter: &ExportFilter,
        path: &Path,
    ) -> ExportResult<()> {
        for student in self.db.students_missing_password().await? {
            self.db
                .set_student_password(&student.sis_id, &accounts::gen_password(8))
                .await?;
        }

        let mut sheet = Sheet::new(
            "students",
            &[
                "student_id",
                "First Name [Required]",
                "Last Name [Required]",
                "Email Address [Required]",
                "Password [Required]",
                "Org Unit Path [Required]",
                "Department",
                "Recovery Email",
                "Recovery Phone [MUST BE IN THE E.164 FORMAT]",
            ],
        );
        for student in self.filtered_students(filter).await? {
            let parent = self
                .db
                .student_parents(&student.sis_id)
                .await?
                .into_iter()
                .next();
            let department = student
                .graduation_year
                .map(|gy| (gy - 2000).to_string())
                .unwrap_or_default();
            sheet.push(vec![
                student.sis_id.clone(),
                student.common_name.clone(),
                student.last_name.clone(),
                student.email.clone().unwrap_or_default(),
                student.password.clone().unwrap_or_default(),
                STUDENT_ORG_UNIT.to_string(),
                department,
                parent
                    .as_ref()
                    .and_then(|p| p.email.clone())
                    .unwrap_or_default(),
                parent
                    .as_ref()
                    .and_then(|p| p.phone.as_deref().map(|ph| format!("+1{ph}")))
                    .unwrap_or_default(),
            ]);
        }
        sheet.save(path)
    }

    /// Barcode-label order sheet for standardized testing: homeroom
    /// students in the tested grades with MM/DD/YYYY birthdays.
    pub async fn itbs_labels(
        &self,
        term: &Term,
        filter: &ExportFilter,
        path: &Path,
    ) -> ExportResult<()> {
        let mut sheet = Sheet::new(
            &format!("ITBS {}", term.term_name),
            &[
                "Last Name",
                "First Name",
                "Middle Name",
                "Date of Birth",
                "Gender",
                "Grade",
                "School / Building Name",
                "School / Building Code",
                "Class Name",
                "Class Code",
                "Student ID Number",
                "ITBS or ITED or Logramos Form",
                "ITBS or ITED or Logramos Level",
            ],
        );
        for course in self.db.homeroom_courses(term.term_id).await? {
            let teacher = self
                .db
                .course_teachers(&course.sis_id)
                .await?
                .into_iter()
                .next()
                .map(|t| t.teacher_name)
                .unwrap_or_default();
            for section in self.db.course_sections(&course.sis_id).await? {
                let building: String = section.section_name.chars().take(2).collect();
                let class_code: String = section.section_name.chars().take(5).collect();
                for student in self.db.section_students(&section.section_id).await? {
                    let grade = match self.grade_of(&student) {
                        Some(g) if student.active && filter.matches_grade(Some(g)) => g,
                        _ => continue,
                    };
                    if !student.sis_id.starts_with(&filter.id_prefix) {
                        continue;
                    }
                    // the label id is the numeric tail of the SIS id
                    let id_number = student
                        .sis_id
                        .get(3..8)
                        .and_then(|digits| digits.parse::<i64>().ok())
                        .map(|n| n.to_string())
                        .unwrap_or_default();
                    sheet.push(vec![
                        student.last_name.clone(),
                        student.first_name.clone().unwrap_or_default(),
                        String::new(),
                        student
                            .birthday
                            .map(|b| b.format("%m/%d/%Y").to_string())
                            .unwrap_or_default(),
                        student.gender.clone().unwrap_or_default(),
                        grade.to_string(),
                        building.clone(),
                        String::new(),
                        teacher.clone(),
                        class_code.clone(),
                        id_number,
                        "G".to_string(),
                        (grade + 6).to_string(),
                    ]);
                }
            }
        }
        sheet.save(path)
    }
}
