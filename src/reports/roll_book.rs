//! Attendance roll books: one page per 18 class days, per homeroom.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::calendar::{SchoolCalendar, WeekdayMask, DATES_PER_PAGE};
use crate::config::Config;
use crate::db::{Course, Database};
use crate::reports::{ReportError, ReportResult, ReportWriter, Templates};

#[derive(Debug, Serialize)]
struct MonthView {
    span: usize,
    name: String,
}

#[derive(Debug, Serialize)]
struct DayView {
    weekday: String,
    number: u32,
}

/// Class-day mask for a course. Primary homerooms meet Tuesday through
/// Thursday, with JK/K only on Tuesday and Thursday. Everyone else meets
/// every weekday.
fn course_mask(sis_id: &str) -> WeekdayMask {
    let chars: Vec<char> = sis_id.chars().collect();
    if chars.get(6) == Some(&'P') {
        if matches!(chars.get(8), Some('0') | Some('K')) {
            WeekdayMask::new(&[Weekday::Tue, Weekday::Thu])
        } else {
            WeekdayMask::new(&[Weekday::Tue, Weekday::Wed, Weekday::Thu])
        }
    } else {
        WeekdayMask::WEEKDAYS
    }
}

/// Campus code carried in the course SIS id ("2025SM..." -> "SM").
fn course_campus(sis_id: &str) -> &str {
    if sis_id.len() >= 6 {
        &sis_id[4..6]
    } else {
        ""
    }
}

fn month_spans(days: &[NaiveDate]) -> Vec<MonthView> {
    let mut months: Vec<MonthView> = Vec::new();
    for day in days {
        let name = day.format("%B").to_string();
        match months.last_mut() {
            Some(last) if last.name == name => last.span += 1,
            _ => months.push(MonthView { span: 1, name }),
        }
    }
    months
}

pub struct RollBooks {
    db: Arc<Database>,
    config: Arc<Config>,
    templates: Templates,
}

impl RollBooks {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> ReportResult<Self> {
        Ok(Self {
            db,
            config,
            templates: Templates::new()?,
        })
    }

    fn calendar(&self) -> ReportResult<(SchoolCalendar, String)> {
        let (start, end) = match (self.config.school_year_start, self.config.school_year_end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(ReportError::Data(
                    "school_year_start and school_year_end must be configured".to_string(),
                ))
            }
        };
        let label = if start.year() == end.year() {
            start.year().to_string()
        } else {
            format!("{}-{}", start.year(), end.year())
        };
        Ok((
            SchoolCalendar::new(start, end, self.config.school_holidays.clone()),
            label,
        ))
    }

    async fn course_pages(
        &self,
        course: &Course,
        calendar: &SchoolCalendar,
        year_label: &str,
    ) -> ReportResult<Vec<String>> {
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
                students.push(format!("{}, {}", student.last_name, student.common_name));
            }
        }
        students.sort();
        students.dedup();

        let mut bodies = Vec::new();
        for page in calendar.pages(course_mask(&course.sis_id), DATES_PER_PAGE) {
            let days: Vec<DayView> = page
                .iter()
                .map(|d| DayView {
                    weekday: d.format("%a").to_string(),
                    number: d.day(),
                })
                .collect();
            let mut context = tera::Context::new();
            context.insert("year_label", year_label);
            context.insert("course_name", &course.print_name);
            context.insert("teacher", &teacher);
            context.insert("months", &month_spans(&page));
            context.insert("days", &days);
            context.insert("students", &students);
            bodies.push(self.templates.render("roll_book.html", &context)?);
        }
        Ok(bodies)
    }

    /// Roll books for one campus, selected by the two-letter code in the
    /// course SIS ids. Homerooms and upper-school ('U') courses qualify.
    pub async fn write_campus(
        &self,
        writer: &ReportWriter,
        term_id: i64,
        campus: &str,
    ) -> ReportResult<PathBuf> {
        let (calendar, year_label) = self.calendar()?;
        let mut courses: Vec<Course> = self
            .db
            .term_courses(term_id)
            .await?
            .into_iter()
            .filter(|c| course_campus(&c.sis_id) == campus)
            .filter(|c| c.homeroom || c.sis_id.chars().nth(6) == Some('U'))
            .collect();
        courses.sort_by(|a, b| a.sis_id.cmp(&b.sis_id));

        let mut bodies = Vec::new();
        for course in &courses {
            bodies.extend(self.course_pages(course, &calendar, &year_label).await?);
        }
        let html = self
            .templates
            .page("Roll Books", "rollbook.css", &bodies)?;
        let path = writer.root().join(format!("Roll Books {campus}.html"));
        writer.write_html(&path, &html)?;
        writer
            .to_pdf(
                &path,
                &writer.root().join(format!("Roll Books {campus}.pdf")),
            )
            .await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_by_division() {
        let primary = course_mask("2025SMP01");
        assert!(primary.contains(Weekday::Tue));
        assert!(primary.contains(Weekday::Wed));
        assert!(!primary.contains(Weekday::Mon));

        let kindergarten = course_mask("2025SMP0K");
        assert!(kindergarten.contains(Weekday::Tue));
        assert!(!kindergarten.contains(Weekday::Wed));
        assert!(kindergarten.contains(Weekday::Thu));

        let upper = course_mask("2025SMULAT7");
        assert_eq!(upper, WeekdayMask::WEEKDAYS);
    }

    #[test]
    fn campus_code() {
        assert_eq!(course_campus("2025SMP01"), "SM");
        assert_eq!(course_campus("2025"), "");
    }

    #[test]
    fn months_group_consecutive_days() {
        let days = vec![
            NaiveDate::from_ymd_opt(2025, 8, 28).unwrap(),
            NaiveDate::from_ymd_opt(2025, 8, 29).unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 2).unwrap(),
        ];
        let months = month_spans(&days);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].name, "August");
        assert_eq!(months[0].span, 2);
        assert_eq!(months[1].name, "September");
        assert_eq!(months[1].span, 1);
    }
}
