//! Round-trip tests for the SQLite cache.

use registrar::db::{
    Attendance, Course, Database, DatabaseError, GradeRecord, GradingPeriod, GradingPeriodGroup,
    Parent, Section, Student, Teacher, Term,
};

fn student(sis_id: &str, last_name: &str, graduation_year: i32) -> Student {
    Student {
        sis_id: sis_id.to_string(),
        canvas_id: None,
        common_name: "Test".to_string(),
        first_name: Some("Test".to_string()),
        middle_name: None,
        last_name: last_name.to_string(),
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

fn parent(crm_id: &str, last_name: &str) -> Parent {
    Parent {
        crm_id: crm_id.to_string(),
        canvas_id: None,
        first_name: "Pat".to_string(),
        last_name: last_name.to_string(),
        email: Some(format!("{crm_id}@example.com")),
        phone: Some("5025550188".to_string()),
        password: None,
        active: true,
    }
}

fn course(sis_id: &str, term_id: i64, homeroom: bool) -> Course {
    Course {
        sis_id: sis_id.to_string(),
        canvas_id: Some(1000),
        term_id: Some(term_id),
        full_name: format!("Course {sis_id}"),
        print_name: format!("Course {sis_id}"),
        account_id: None,
        standard_id: None,
        homeroom,
    }
}

fn period(period_id: i64, name: &str, group: i64) -> GradingPeriod {
    GradingPeriod {
        period_id,
        period_name: name.to_string(),
        gp_group_id: Some(group),
        note_column: None,
        midterm_column: None,
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
    for (id, name) in [(1, "Trimester 1"), (2, "Trimester 2"), (3, "Trimester 3")] {
        db.upsert_grading_period(&period(id, name, 1)).await.unwrap();
    }
    term
}

#[tokio::test]
async fn student_upsert_and_active_filtering() {
    let db = Database::new_in_memory().await.unwrap();

    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_student(&student("s10107", "Baker", 2028)).await.unwrap();
    db.upsert_student(&student("c00004", "Cole", 2029)).await.unwrap();

    let fetched = db.get_student("s10042").await.unwrap().unwrap();
    assert_eq!(fetched.last_name, "Adams");
    assert_eq!(fetched.graduation_year, Some(2030));

    let active = db.active_students("s").await.unwrap();
    assert_eq!(active.len(), 2);

    assert_eq!(
        db.highest_student_id("s").await.unwrap(),
        Some("s10107".to_string())
    );

    db.deactivate_students().await.unwrap();
    assert!(db.active_students("s").await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_preserves_generated_fields() {
    let db = Database::new_in_memory().await.unwrap();

    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.set_student_email("s10042", "tadams30@example.com").await.unwrap();
    db.set_student_password("s10042", "w8rQ!pvx").await.unwrap();

    // a later pull without email/password must not wipe them
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    let fetched = db.get_student("s10042").await.unwrap().unwrap();
    assert_eq!(fetched.email.as_deref(), Some("tadams30@example.com"));
    assert_eq!(fetched.password.as_deref(), Some("w8rQ!pvx"));

    db.clear_student_password("s10042").await.unwrap();
    let fetched = db.get_student("s10042").await.unwrap().unwrap();
    assert_eq!(fetched.password, None);
}

#[tokio::test]
async fn duplicate_email_is_a_unique_violation() {
    let db = Database::new_in_memory().await.unwrap();
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_student(&student("s10043", "Adams", 2031)).await.unwrap();

    db.set_student_email("s10042", "tadams30@example.com").await.unwrap();
    let err = db
        .set_student_email("s10043", "tadams30@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UniqueViolation(_)));
}

#[tokio::test]
async fn parent_links_round_trip() {
    let db = Database::new_in_memory().await.unwrap();
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_parent(&parent("p100", "Adams")).await.unwrap();
    db.upsert_parent(&parent("p101", "Adams")).await.unwrap();

    db.link_student_parent("s10042", "p100").await.unwrap();
    db.link_student_parent("s10042", "p101").await.unwrap();

    let parents = db.student_parents("s10042").await.unwrap();
    assert_eq!(parents.len(), 2);

    let students = db.parent_students("p100").await.unwrap();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].sis_id, "s10042");

    db.clear_student_parents("s10042").await.unwrap();
    assert!(db.student_parents("s10042").await.unwrap().is_empty());
}

#[tokio::test]
async fn cumulative_periods_stop_at_the_given_period() {
    let db = Database::new_in_memory().await.unwrap();
    seed_term(&db).await;

    let second = db.period_by_id(2).await.unwrap().unwrap();
    let cumulative = db.cumulative_periods(&second).await.unwrap();
    let names: Vec<&str> = cumulative.iter().map(|p| p.period_name.as_str()).collect();
    assert_eq!(names, vec!["Trimester 1", "Trimester 2"]);
}

#[tokio::test]
async fn term_resolves_from_period_group() {
    let db = Database::new_in_memory().await.unwrap();
    let term = seed_term(&db).await;

    let period = db.period_by_id(1).await.unwrap().unwrap();
    let resolved = db.term_for_period(&period).await.unwrap().unwrap();
    assert_eq!(resolved.term_id, term.term_id);
}

#[tokio::test]
async fn grade_records_replace_per_period() {
    let db = Database::new_in_memory().await.unwrap();
    let term = seed_term(&db).await;
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_course(&course("2025SMUALG8", term.term_id, false))
        .await
        .unwrap();

    let record = GradeRecord {
        id: None,
        student_id: "s10042".to_string(),
        period_id: Some(1),
        term_id: None,
        course_id: "2025SMUALG8".to_string(),
        score: Some(85.2),
        grade: Some("B".to_string()),
        comment: None,
        quality_points: Some(3.0),
        midterm: false,
    };
    db.insert_grade_record(&record).await.unwrap();

    let fetched = db
        .grade_record("s10042", "2025SMUALG8", 1, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.score, Some(85.2));
    assert_eq!(fetched.grade.as_deref(), Some("B"));

    db.set_grade_comment("s10042", "2025SMUALG8", 1, false, "Strong start")
        .await
        .unwrap();
    let fetched = db
        .grade_record("s10042", "2025SMUALG8", 1, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.comment.as_deref(), Some("Strong start"));

    // comments for students without records are an error the caller logs
    let missing = db
        .set_grade_comment("s10099", "2025SMUALG8", 1, false, "No record")
        .await;
    assert!(matches!(missing, Err(DatabaseError::NotFound(_))));

    db.delete_period_records("2025SMUALG8", 1, false).await.unwrap();
    assert!(db
        .grade_record("s10042", "2025SMUALG8", 1, false)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn final_records_live_beside_period_records() {
    let db = Database::new_in_memory().await.unwrap();
    let term = seed_term(&db).await;
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_course(&course("2025SMUALG8", term.term_id, false))
        .await
        .unwrap();

    db.insert_grade_record(&GradeRecord {
        id: None,
        student_id: "s10042".to_string(),
        period_id: None,
        term_id: Some(term.term_id),
        course_id: "2025SMUALG8".to_string(),
        score: Some(88.0),
        grade: Some("B".to_string()),
        comment: None,
        quality_points: Some(3.0),
        midterm: false,
    })
    .await
    .unwrap();

    let final_rec = db
        .final_grade_record("s10042", "2025SMUALG8", term.term_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(final_rec.score, Some(88.0));
    assert!(db
        .grade_record("s10042", "2025SMUALG8", 1, false)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn enrollment_and_homeroom_teacher_lookup() {
    let db = Database::new_in_memory().await.unwrap();
    let term = seed_term(&db).await;

    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_course(&course("2025SMP03", term.term_id, true)).await.unwrap();
    db.upsert_section(&Section {
        section_id: "sec1".to_string(),
        section_name: "SM 3rd".to_string(),
        course_id: "2025SMP03".to_string(),
    })
    .await
    .unwrap();
    db.link_section_student("sec1", "s10042").await.unwrap();

    db.upsert_teacher(&Teacher {
        sis_id: "t001".to_string(),
        canvas_id: None,
        teacher_name: "J. Rivers".to_string(),
        active: true,
    })
    .await
    .unwrap();
    db.link_course_teacher("2025SMP03", "t001").await.unwrap();

    let courses = db.student_courses("s10042", term.term_id).await.unwrap();
    assert_eq!(courses.len(), 1);
    assert!(courses[0].homeroom);

    let teacher = db
        .homeroom_teacher("s10042", term.term_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(teacher.teacher_name, "J. Rivers");

    db.clear_course_enrollment("2025SMP03").await.unwrap();
    assert!(db.student_courses("s10042", term.term_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn attendance_wipe_and_reload() {
    let db = Database::new_in_memory().await.unwrap();
    seed_term(&db).await;
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();

    db.upsert_attendance(&Attendance {
        student_id: "s10042".to_string(),
        period_id: 1,
        absences: 2.5,
        tardies: 1,
    })
    .await
    .unwrap();

    let rec = db.attendance_for("s10042", 1).await.unwrap().unwrap();
    assert_eq!(rec.absences, 2.5);
    assert_eq!(rec.tardies, 1);

    db.delete_attendance_for_period(1).await.unwrap();
    assert!(db.attendance_for("s10042", 1).await.unwrap().is_none());
}

#[tokio::test]
async fn stats_count_rows() {
    let db = Database::new_in_memory().await.unwrap();
    let term = seed_term(&db).await;
    db.upsert_student(&student("s10042", "Adams", 2030)).await.unwrap();
    db.upsert_course(&course("2025SMUALG8", term.term_id, false))
        .await
        .unwrap();

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.students, 1);
    assert_eq!(stats.active_students, 1);
    assert_eq!(stats.courses, 1);
}
