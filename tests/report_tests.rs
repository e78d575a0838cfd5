//! Report assembly against the in-memory cache.

use std::path::PathBuf;
use std::sync::Arc;

use registrar::config::Config;
use registrar::db::{
    Account, Attendance, Course, Database, GradeRecord, GradingPeriod, GradingPeriodGroup, Parent,
    Section, Student, Teacher, Term,
};
use registrar::reports::report_card::{CardVariant, ReportCards};
use registrar::reports::roster::Rosters;
use registrar::reports::{ReportWriter, Templates};

fn test_config() -> Config {
    Config {
        canvas_host: "canvas.example.com".to_string(),
        canvas_token: "token".to_string(),
        root_account: "1".to_string(),
        crm_host: "crm.example.com".to_string(),
        crm_api_key: "key".to_string(),
        crm_site_key: "site".to_string(),
        current_term_name: "2025-2026".to_string(),
        current_period_name: "Trimester 2".to_string(),
        current_grad_year: Some(2026),
        zero_blanks: false,
        student_email_domain: "@students.example.com".to_string(),
        database_path: ":memory:".to_string(),
        output_dir: PathBuf::from("generated_docs"),
        school_year_start: None,
        school_year_end: None,
        school_holidays: Vec::new(),
        smtp: None,
    }
}

fn student(sis_id: &str, name: &str, last: &str, graduation_year: i32) -> Student {
    Student {
        sis_id: sis_id.to_string(),
        canvas_id: None,
        common_name: name.to_string(),
        first_name: Some(name.to_string()),
        middle_name: None,
        last_name: last.to_string(),
        birthday: None,
        gender: None,
        graduation_year: Some(graduation_year),
        house: None,
        active: true,
        password: None,
        email: None,
        last_login: None,
    }
}

async fn seed_term(db: &Database) -> Term {
    db.upsert_gp_group(&GradingPeriodGroup {
        gp_group_id: 1,
        gp_group_name: "Trimesters".to_string(),
    })
    .await
    .unwrap();
    let term = Term {
        term_id: 10,
        term_name: "2025-2026".to_string(),
        gp_group_id: Some(1),
    };
    db.upsert_term(&term).await.unwrap();
    for (id, name) in [(1, "Trimester 1"), (2, "Trimester 2")] {
        db.upsert_grading_period(&GradingPeriod {
            period_id: id,
            period_name: name.to_string(),
            gp_group_id: Some(1),
            note_column: None,
            midterm_column: None,
        })
        .await
        .unwrap();
    }
    term
}

async fn enroll(db: &Database, course: &Course, section_id: &str, sis_id: &str) {
    db.upsert_course(course).await.unwrap();
    db.upsert_section(&Section {
        section_id: section_id.to_string(),
        section_name: course.print_name.clone(),
        course_id: course.sis_id.clone(),
    })
    .await
    .unwrap();
    db.link_section_student(section_id, sis_id).await.unwrap();
}

async fn grade(db: &Database, sis_id: &str, course_id: &str, period_id: i64, score: f64, letter: &str) {
    db.insert_grade_record(&GradeRecord {
        id: None,
        student_id: sis_id.to_string(),
        period_id: Some(period_id),
        term_id: None,
        course_id: course_id.to_string(),
        score: Some(score),
        grade: Some(letter.to_string()),
        comment: None,
        quality_points: None,
        midterm: false,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn upper_school_card_renders_grades_and_attendance() {
    let db = Arc::new(Database::new_in_memory().await.unwrap());
    let term = seed_term(&db).await;

    // graduation year 2030 is grade 8 for the class of 2026
    db.upsert_student(&student("s10042", "Ada", "Adams", 2030))
        .await
        .unwrap();
    let algebra = Course {
        sis_id: "2025SMUALG8".to_string(),
        canvas_id: Some(1),
        term_id: Some(term.term_id),
        full_name: "Algebra I".to_string(),
        print_name: "Algebra I".to_string(),
        account_id: None,
        standard_id: None,
        homeroom: false,
    };
    enroll(&db, &algebra, "sec-alg", "s10042").await;
    db.upsert_teacher(&Teacher {
        sis_id: "t001".to_string(),
        canvas_id: None,
        teacher_name: "J. Rivers".to_string(),
        active: true,
    })
    .await
    .unwrap();
    db.link_course_teacher("2025SMUALG8", "t001").await.unwrap();

    grade(&db, "s10042", "2025SMUALG8", 1, 91.3, "A").await;
    grade(&db, "s10042", "2025SMUALG8", 2, 85.2, "B").await;
    db.set_grade_comment("s10042", "2025SMUALG8", 2, false, "Solid effort")
        .await
        .unwrap();
    db.upsert_attendance(&Attendance {
        student_id: "s10042".to_string(),
        period_id: 1,
        absences: 1.5,
        tardies: 2,
    })
    .await
    .unwrap();

    let cards = ReportCards::new(Arc::clone(&db), Arc::new(test_config())).unwrap();
    let period = db.period_by_id(2).await.unwrap().unwrap();
    let html = cards
        .student_card(
            &db.get_student("s10042").await.unwrap().unwrap(),
            &period,
            false,
            CardVariant::Upper,
        )
        .await
        .unwrap();

    assert!(html.contains("Ada Adams"));
    assert!(html.contains("Grade 8"));
    assert!(html.contains("Algebra I"));
    assert!(html.contains("J. Rivers"));
    // both cumulative periods appear
    assert!(html.contains("T1") && html.contains("T2"));
    assert!(html.contains("91.3%"));
    assert!(html.contains("85.2%"));
    assert!(html.contains("Solid effort"));
    assert!(html.contains("1.5"));
}

#[tokio::test]
async fn lower_school_card_computes_language_arts() {
    let db = Arc::new(Database::new_in_memory().await.unwrap());
    let term = seed_term(&db).await;

    // class of 2034 is grade 4
    db.upsert_student(&student("s10050", "Ben", "Brown", 2034))
        .await
        .unwrap();
    for (canvas_id, sis_id, name) in [
        (1, "2025SMP4SPL", "Spelling"),
        (2, "2025SMP4GRM", "Grammar"),
        (3, "2025SMP4MTH", "Math"),
    ] {
        let course = Course {
            sis_id: sis_id.to_string(),
            canvas_id: Some(canvas_id),
            term_id: Some(term.term_id),
            full_name: name.to_string(),
            print_name: name.to_string(),
            account_id: None,
            standard_id: None,
            homeroom: false,
        };
        enroll(&db, &course, &format!("sec-{sis_id}"), "s10050").await;
    }
    grade(&db, "s10050", "2025SMP4SPL", 1, 90.0, "A").await;
    grade(&db, "s10050", "2025SMP4GRM", 1, 80.0, "B").await;
    grade(&db, "s10050", "2025SMP4MTH", 1, 95.0, "A").await;

    let cards = ReportCards::new(Arc::clone(&db), Arc::new(test_config())).unwrap();
    let period = db.period_by_id(1).await.unwrap().unwrap();
    let html = cards
        .student_card(
            &db.get_student("s10050").await.unwrap().unwrap(),
            &period,
            false,
            CardVariant::Lower,
        )
        .await
        .unwrap();

    // Math renames to Arithmetic, the composite mean (85.0) letters as B
    assert!(html.contains("Arithmetic"));
    assert!(html.contains("Language Arts"));
    assert!(html.contains("85.0%"));
}

#[tokio::test]
async fn roster_lists_students_with_parent_contacts() {
    let db = Arc::new(Database::new_in_memory().await.unwrap());
    let term = seed_term(&db).await;

    db.upsert_student(&student("s10042", "Ada", "Adams", 2034))
        .await
        .unwrap();
    db.upsert_parent(&Parent {
        crm_id: "p100".to_string(),
        canvas_id: None,
        first_name: "Pat".to_string(),
        last_name: "Adams".to_string(),
        email: Some("pat@example.com".to_string()),
        phone: Some("5025550188".to_string()),
        password: None,
        active: true,
    })
    .await
    .unwrap();
    db.link_student_parent("s10042", "p100").await.unwrap();

    db.upsert_account(&Account {
        canvas_id: 5,
        sis_id: Some("LS4".to_string()),
        account_name: "Lower School 4".to_string(),
        parent_account_id: None,
        root_account_id: None,
    })
    .await
    .unwrap();

    let homeroom = Course {
        sis_id: "2025SMP04".to_string(),
        canvas_id: Some(1),
        term_id: Some(term.term_id),
        full_name: "Classical Studies 4".to_string(),
        print_name: "Classical Studies 4".to_string(),
        account_id: Some("LS4".to_string()),
        standard_id: None,
        homeroom: true,
    };
    enroll(&db, &homeroom, "sec-hr", "s10042").await;

    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(dir.path());
    let rosters = Rosters::new(Arc::clone(&db)).unwrap();
    let path = rosters.write_all(&writer, term.term_id).await.unwrap();

    let html = std::fs::read_to_string(&path).unwrap();
    assert!(html.contains("Grade 4"));
    assert!(html.contains("Ada Adams"));
    assert!(html.contains("Pat Adams"));
    assert!(html.contains("502 555-0188"));
    assert!(html.contains("pat@example.com"));
}

#[test]
fn templates_register_cleanly() {
    assert!(Templates::new().is_ok());
}
