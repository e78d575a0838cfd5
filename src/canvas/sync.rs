//! Pull operations: Canvas is the source of truth for terms, courses,
//! enrollment, and grades, and each pull refreshes the local cache.

use std::sync::Arc;
use tracing::{info, warn};

use crate::canvas::client::{CanvasClient, CanvasError, CanvasResult, PER_PAGE};
use crate::canvas::types::{
    CanvasCourse, CanvasEnrollment, CanvasSection, CanvasUser, ColumnDatum, EnrollmentTermPage,
    GradebookColumn, GradingPeriodPage, GradingStandardEntry, SubAccount,
};
use crate::config::Config;
use crate::db::{
    Account, Course, Database, GradeRecord, GradingPeriod, GradingPeriodGroup, GradingStandard,
    Section, Student, Teacher, Term,
};
use crate::grading;

/// Strip control characters that teachers sometimes paste into gradebook
/// comments. Newlines and tabs survive.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Grade and score as they should be recorded: a blank gradebook cell
/// means the course is ungraded for the student, which prints as "Pass".
fn classify_grade(grade: Option<&str>, score: Option<f64>) -> (String, Option<f64>) {
    match grade {
        None | Some("") => ("Pass".to_string(), None),
        Some(g @ ("Pass" | "pass" | "Fail" | "fail")) => (g.to_string(), None),
        Some(g) => (g.to_string(), score),
    }
}

pub struct CanvasSync {
    client: CanvasClient,
    db: Arc<Database>,
    config: Arc<Config>,
}

impl CanvasSync {
    pub fn new(client: CanvasClient, db: Arc<Database>, config: Arc<Config>) -> Self {
        Self { client, db, config }
    }

    pub fn client(&self) -> &CanvasClient {
        &self.client
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Pull all enrollment terms. Terms without a grading-period group are
    /// still stored so they can be inspected, but reports need the group.
    pub async fn pull_terms(&self) -> CanvasResult<()> {
        let path = format!(
            "accounts/{}/terms?per_page={PER_PAGE}",
            self.config.root_account
        );
        let terms = self
            .client
            .get_all_nested(&path, |page: EnrollmentTermPage| page.enrollment_terms)
            .await?;

        for term in &terms {
            if term.grading_period_group_id.is_none() {
                warn!("No grading periods present for term '{}'", term.name);
            }
            if let Some(group_id) = term.grading_period_group_id {
                self.db
                    .upsert_gp_group(&GradingPeriodGroup {
                        gp_group_id: group_id,
                        gp_group_name: term.name.clone(),
                    })
                    .await?;
            }
            self.db
                .upsert_term(&Term {
                    term_id: term.id,
                    term_name: term.name.clone(),
                    gp_group_id: term.grading_period_group_id,
                })
                .await?;
        }
        info!("Pulled {} terms", terms.len());
        Ok(())
    }

    /// Pull all grading periods. Orphan periods in the cache are left alone.
    pub async fn pull_grading_periods(&self) -> CanvasResult<()> {
        let path = format!(
            "accounts/{}/grading_periods?per_page={PER_PAGE}",
            self.config.root_account
        );
        let periods = self
            .client
            .get_all_nested(&path, |page: GradingPeriodPage| page.grading_periods)
            .await?;

        for period in &periods {
            self.db
                .upsert_grading_period(&GradingPeriod {
                    period_id: period.id,
                    period_name: period.title.clone(),
                    gp_group_id: period.grading_period_group_id,
                    note_column: None,
                    midterm_column: None,
                })
                .await?;
        }
        info!("Pulled {} grading periods", periods.len());
        Ok(())
    }

    /// Pull the full sub-account tree under the root account.
    pub async fn pull_accounts(&self) -> CanvasResult<()> {
        let path = format!(
            "accounts/{}/sub_accounts?recursive=true&per_page={PER_PAGE}",
            self.config.root_account
        );
        let accounts: Vec<SubAccount> = self.client.get_all(&path).await?;
        for account in &accounts {
            self.db
                .upsert_account(&Account {
                    canvas_id: account.id,
                    sis_id: account.sis_account_id.clone(),
                    account_name: account.name.clone(),
                    parent_account_id: account.parent_account_id,
                    root_account_id: account.root_account_id,
                })
                .await?;
        }
        info!("Pulled {} sub-accounts", accounts.len());
        Ok(())
    }

    /// Pull account-level grading standards; course-level ones are noise.
    pub async fn pull_grading_standards(&self) -> CanvasResult<()> {
        let path = format!("accounts/{}/grading_standards", self.config.root_account);
        let standards: Vec<GradingStandardEntry> = self.client.get_all(&path).await?;
        let mut stored = 0;
        for standard in &standards {
            if standard.context_type != "Account" {
                continue;
            }
            self.db
                .upsert_grading_standard(&GradingStandard {
                    standard_id: standard.id,
                    standard_title: standard.title.clone(),
                    grading_scheme: standard.scheme_map(),
                })
                .await?;
            stored += 1;
        }
        info!("Pulled {stored} grading standards");
        Ok(())
    }

    /// Pull every user with a teacher enrollment, deactivating the rest.
    pub async fn pull_teachers(&self) -> CanvasResult<()> {
        self.db.deactivate_teachers().await?;
        let path = format!(
            "accounts/{}/users?enrollment_type=teacher&per_page={PER_PAGE}",
            self.config.root_account
        );
        let users: Vec<CanvasUser> = self.client.get_all(&path).await?;
        for user in &users {
            let Some(sis_id) = &user.sis_user_id else {
                warn!("Teacher '{}' has no SIS ID, skipping", user.name);
                continue;
            };
            self.db
                .upsert_teacher(&Teacher {
                    sis_id: sis_id.clone(),
                    canvas_id: Some(user.id),
                    teacher_name: user.name.clone(),
                    active: true,
                })
                .await?;
        }
        info!("Pulled {} teachers", users.len());
        Ok(())
    }

    /// Reconcile Canvas ids for students whose SIS id carries the given
    /// prefix. Only needed when students get added to Canvas out of band.
    pub async fn pull_student_canvas_ids(&self, id_prefix: &str) -> CanvasResult<()> {
        let mut path = format!(
            "accounts/{}/users?enrollment_type=student&per_page={PER_PAGE}",
            self.config.root_account
        );
        // search_term needs at least three characters
        if id_prefix.len() >= 3 {
            path.push_str(&format!("&search_term={id_prefix}"));
        }
        let users: Vec<CanvasUser> = self.client.get_all(&path).await?;

        for user in &users {
            let Some(sis_id) = &user.sis_user_id else {
                warn!("Student '{}' has no SIS ID, skipping", user.name);
                continue;
            };
            if !sis_id.starts_with(id_prefix) {
                continue;
            }
            let (first, last) = user.split_name();
            match self.db.student_by_canvas_id(user.id).await? {
                Some(existing) if existing.sis_id == *sis_id => {}
                Some(existing) => {
                    // the canvas id moved to a different student
                    self.db.set_student_canvas_id(&existing.sis_id, None).await?;
                    self.upsert_stub_student(sis_id, user.id, &first, &last).await?;
                }
                None => {
                    self.upsert_stub_student(sis_id, user.id, &first, &last).await?;
                }
            }
        }
        Ok(())
    }

    async fn upsert_stub_student(
        &self,
        sis_id: &str,
        canvas_id: i64,
        first: &str,
        last: &str,
    ) -> CanvasResult<()> {
        let existing = self.db.get_student(sis_id).await?;
        let student = Student {
            sis_id: sis_id.to_string(),
            canvas_id: Some(canvas_id),
            common_name: first.to_string(),
            last_name: last.to_string(),
            active: existing.as_ref().map(|s| s.active).unwrap_or(false),
            first_name: None,
            middle_name: None,
            birthday: None,
            gender: None,
            graduation_year: None,
            house: None,
            password: None,
            email: None,
            last_login: None,
        };
        self.db.upsert_student(&student).await?;
        Ok(())
    }

    /// Pull the courses with enrollments in a term. Courses created in the
    /// web UI without a SIS id are skipped.
    pub async fn pull_courses(&self, term: &Term) -> CanvasResult<()> {
        let path = format!(
            "accounts/{}/courses?include[]=account&with_enrollments=true&enrollment_term_id={}&per_page={PER_PAGE}",
            self.config.root_account, term.term_id
        );
        let courses: Vec<CanvasCourse> = self.client.get_all(&path).await?;
        for course in &courses {
            let Some(sis_id) = &course.sis_course_id else {
                warn!("Unable to add '{}': it has no SIS ID", course.name);
                continue;
            };
            let record = Course {
                sis_id: sis_id.clone(),
                canvas_id: Some(course.id),
                term_id: course.enrollment_term_id,
                full_name: course.name.clone(),
                print_name: course.course_code.clone(),
                account_id: course.account.as_ref().and_then(|a| a.sis_account_id.clone()),
                standard_id: course.grading_standard_id,
                homeroom: false,
            };
            let homeroom = record.guess_homeroom();
            self.db.upsert_course(&record).await?;
            self.db.set_course_homeroom(sis_id, homeroom).await?;
        }
        info!("Pulled {} courses for term '{}'", courses.len(), term.term_name);
        Ok(())
    }

    /// Pull a course's sections and the students enrolled in each. Old
    /// links are cleared first; orphan sections stay.
    pub async fn pull_enrollment(&self, course: &Course) -> CanvasResult<()> {
        let canvas_id = self.require_canvas_id(course)?;
        self.db.clear_course_enrollment(&course.sis_id).await?;

        let path =
            format!("courses/{canvas_id}/sections?include[]=students&per_page={PER_PAGE}");
        let sections: Vec<CanvasSection> = self.client.get_all(&path).await?;

        for section in &sections {
            let Some(students) = &section.students else {
                continue;
            };
            let Some(course_sis) = &section.sis_course_id else {
                warn!(
                    "Skipping section '{}': its course has no SIS ID",
                    section.name
                );
                continue;
            };
            self.db
                .upsert_section(&Section {
                    section_id: section.id.to_string(),
                    section_name: section.name.clone(),
                    course_id: course_sis.clone(),
                })
                .await?;
            for student in students {
                let Some(sis_id) = &student.sis_user_id else {
                    warn!("Student '{}' has no SIS ID", student.name);
                    continue;
                };
                // only link students the CRM pull has already created
                if self.db.get_student(sis_id).await?.is_none() {
                    continue;
                }
                self.db
                    .link_section_student(&section.id.to_string(), sis_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Pull the teachers of record for a course.
    pub async fn pull_course_teachers(&self, course: &Course) -> CanvasResult<()> {
        let canvas_id = self.require_canvas_id(course)?;
        self.db.clear_course_teachers(&course.sis_id).await?;

        let path = format!(
            "courses/{canvas_id}/enrollments?type[]=TeacherEnrollment&per_page={PER_PAGE}"
        );
        let enrollments: Vec<CanvasEnrollment> = self.client.get_all(&path).await?;
        for enrollment in &enrollments {
            let Some(sis_id) = &enrollment.user.sis_user_id else {
                warn!(
                    "Teacher enrollment in '{}' has no SIS ID",
                    course.full_name
                );
                continue;
            };
            if self.db.get_teacher(sis_id).await?.is_none() {
                continue;
            }
            self.db.link_course_teacher(&course.sis_id, sis_id).await?;
        }
        Ok(())
    }

    /// Pull one course's grades for a grading period, replacing any prior
    /// records for that period and midterm flag.
    pub async fn pull_period_grades(
        &self,
        course: &Course,
        period: &GradingPeriod,
        midterm: bool,
    ) -> CanvasResult<()> {
        let canvas_id = self.require_canvas_id(course)?;
        self.db
            .delete_period_records(&course.sis_id, period.period_id, midterm)
            .await?;

        let path = format!(
            "courses/{canvas_id}/enrollments?per_page={PER_PAGE}&type[]=StudentEnrollment&grading_period_id={}",
            period.period_id
        );
        let enrollments: Vec<CanvasEnrollment> = self.client.get_all(&path).await?;
        for enrollment in &enrollments {
            let Some(record) =
                self.grade_record_from(&enrollment, course, Some(period.period_id), None, midterm)
            else {
                continue;
            };
            self.db.insert_grade_record(&record).await?;
        }
        Ok(())
    }

    /// Pull one course's whole-term (final) grades.
    pub async fn pull_term_grades(&self, course: &Course, term: &Term) -> CanvasResult<()> {
        let canvas_id = self.require_canvas_id(course)?;
        self.db.delete_term_records(&course.sis_id, term.term_id).await?;

        let path =
            format!("courses/{canvas_id}/enrollments?per_page={PER_PAGE}&type[]=StudentEnrollment");
        let enrollments: Vec<CanvasEnrollment> = self.client.get_all(&path).await?;
        for enrollment in &enrollments {
            let Some(record) =
                self.grade_record_from(&enrollment, course, None, Some(term.term_id), false)
            else {
                continue;
            };
            self.db.insert_grade_record(&record).await?;
        }
        Ok(())
    }

    fn grade_record_from(
        &self,
        enrollment: &CanvasEnrollment,
        course: &Course,
        period_id: Option<i64>,
        term_id: Option<i64>,
        midterm: bool,
    ) -> Option<GradeRecord> {
        let sis_id = enrollment.user.sis_user_id.as_ref()?;
        let zero_blanks = self.config.zero_blanks;
        let raw_grade = enrollment.grades.grade(zero_blanks);
        let (grade, score) = classify_grade(raw_grade, enrollment.grades.score(zero_blanks));
        Some(GradeRecord {
            id: None,
            student_id: sis_id.clone(),
            period_id,
            term_id,
            course_id: course.sis_id.clone(),
            score,
            grade: Some(grade),
            comment: None,
            quality_points: raw_grade.and_then(grading::quality_points),
            midterm,
        })
    }

    /// Pull teacher comments for a course and period from the matching
    /// custom gradebook column into the existing grade records. Flaky
    /// column listings get three attempts.
    pub async fn pull_period_comments(
        &self,
        course: &Course,
        period: &GradingPeriod,
        midterm: bool,
    ) -> CanvasResult<()> {
        let canvas_id = self.require_canvas_id(course)?;
        if !self
            .db
            .has_period_records(&course.sis_id, period.period_id, midterm)
            .await?
        {
            warn!(
                "No grade records exist for course '{}'. Pull grades before comments",
                course.full_name
            );
            return Ok(());
        }

        let column_name = match period.comment_column(midterm) {
            Some(name) => name.to_string(),
            None => {
                let guessed = period.default_comment_column(midterm);
                info!(
                    "Comment column not set for period '{}', guessing '{guessed}'",
                    period.period_name
                );
                self.db
                    .set_period_comment_column(period.period_id, midterm, &guessed)
                    .await?;
                guessed
            }
        };

        let path = format!(
            "courses/{canvas_id}/custom_gradebook_columns?include_hidden=true&per_page={PER_PAGE}"
        );
        let mut attempts = 0;
        let columns: Vec<GradebookColumn> = loop {
            match self.client.get_all(&path).await {
                Ok(columns) => break columns,
                Err(e) if attempts < 2 => {
                    warn!("Listing gradebook columns failed, retrying: {e}");
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let Some(column) = columns.iter().find(|c| c.title == column_name) else {
            warn!(
                "Course '{}' has no '{column_name}' column",
                course.full_name
            );
            return Ok(());
        };

        let data_path = format!(
            "courses/{canvas_id}/custom_gradebook_columns/{}/data?include_hidden=true&per_page={PER_PAGE}",
            column.id
        );
        let data: Vec<ColumnDatum> = self.client.get_all(&data_path).await?;
        for datum in &data {
            let Some(student) = self.db.student_by_canvas_id(datum.user_id).await? else {
                warn!(
                    "Comment in '{}' for unknown Canvas user {}",
                    course.full_name, datum.user_id
                );
                continue;
            };
            let comment = clean_text(&datum.content);
            if let Err(e) = self
                .db
                .set_grade_comment(
                    &student.sis_id,
                    &course.sis_id,
                    period.period_id,
                    midterm,
                    &comment,
                )
                .await
            {
                warn!(
                    "Could not set comment for {} in '{}': {e}",
                    student.sis_id, course.full_name
                );
            }
        }
        Ok(())
    }

    /// Grades then comments for a trimester report run.
    pub async fn pull_trimester_records(
        &self,
        course: &Course,
        period: &GradingPeriod,
        comments: bool,
    ) -> CanvasResult<()> {
        self.pull_period_grades(course, period, false).await?;
        if comments {
            self.pull_period_comments(course, period, false).await?;
        }
        Ok(())
    }

    /// Current grades mid-period, stored separately from period grades.
    pub async fn pull_midterm_records(
        &self,
        course: &Course,
        period: &GradingPeriod,
        comments: bool,
    ) -> CanvasResult<()> {
        self.pull_period_grades(course, period, true).await?;
        if comments {
            self.pull_period_comments(course, period, true).await?;
        }
        Ok(())
    }

    /// The term named in the configuration, pulling terms and periods
    /// from Canvas if it is not cached yet.
    pub async fn current_term(&self) -> CanvasResult<Term> {
        if let Some(term) = self.db.term_by_name(&self.config.current_term_name).await? {
            return Ok(term);
        }
        self.pull_terms().await?;
        self.pull_grading_periods().await?;
        self.db
            .term_by_name(&self.config.current_term_name)
            .await?
            .ok_or_else(|| {
                CanvasError::Config(format!(
                    "current_term_name '{}' does not match any term",
                    self.config.current_term_name
                ))
            })
    }

    /// The grading period named in the configuration, within the current
    /// term's group.
    pub async fn current_period(&self) -> CanvasResult<GradingPeriod> {
        let term = self.current_term().await?;
        let group = term.gp_group_id.ok_or_else(|| {
            CanvasError::Config(format!(
                "term '{}' has no grading period group",
                term.term_name
            ))
        })?;
        self.db
            .period_in_group(group, &self.config.current_period_name)
            .await?
            .ok_or_else(|| {
                CanvasError::Config(format!(
                    "current_period_name '{}' does not match any period in term '{}'",
                    self.config.current_period_name, term.term_name
                ))
            })
    }

    fn require_canvas_id(&self, course: &Course) -> CanvasResult<i64> {
        course.canvas_id.ok_or_else(|| {
            CanvasError::MissingField(format!("course {} has no Canvas id", course.sis_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_grades_read_as_pass() {
        assert_eq!(classify_grade(None, Some(0.0)), ("Pass".to_string(), None));
        assert_eq!(classify_grade(Some(""), None), ("Pass".to_string(), None));
        assert_eq!(
            classify_grade(Some("fail"), Some(20.0)),
            ("fail".to_string(), None)
        );
        assert_eq!(
            classify_grade(Some("B+"), Some(86.2)),
            ("B+".to_string(), Some(86.2))
        );
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(clean_text("fine\u{0} work\u{7}"), "fine work");
        assert_eq!(clean_text("line\none\ttab"), "line\none\ttab");
    }
}
