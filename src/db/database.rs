use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::db::models::{
    Account, Attendance, Course, CrmField, GradeRecord, GradingPeriod, GradingPeriodGroup,
    GradingStandard, Parent, Section, Student, Teacher, Term,
};

/// Database-related errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Date parsing error: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Row counts for `db stats`.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub students: i64,
    pub active_students: i64,
    pub parents: i64,
    pub teachers: i64,
    pub courses: i64,
    pub sections: i64,
    pub grade_records: i64,
    pub attendance_records: i64,
}

impl fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "students:           {}", self.students)?;
        writeln!(f, "  active:           {}", self.active_students)?;
        writeln!(f, "parents:            {}", self.parents)?;
        writeln!(f, "teachers:           {}", self.teachers)?;
        writeln!(f, "courses:            {}", self.courses)?;
        writeln!(f, "sections:           {}", self.sections)?;
        writeln!(f, "grade records:      {}", self.grade_records)?;
        writeln!(f, "attendance records: {}", self.attendance_records)
    }
}

/// The local relational cache of school records.
pub struct Database {
    pub pool: SqlitePool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

impl Database {
    /// Open (creating if needed) the cache at the given path.
    pub async fn new(db_path: &str) -> DatabaseResult<Self> {
        use sqlx::migrate::MigrateDatabase;
        if !sqlx::Sqlite::database_exists(db_path).await.unwrap_or(false) {
            sqlx::Sqlite::create_database(db_path)
                .await
                .map_err(|e| DatabaseError::Migration(format!("Failed to create database: {e}")))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_path)
            .await
            .map_err(DatabaseError::Connection)?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory cache for tests.
    pub async fn new_in_memory() -> DatabaseResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .map_err(DatabaseError::Connection)?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> DatabaseResult<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                sis_id TEXT PRIMARY KEY,
                canvas_id INTEGER UNIQUE,
                common_name TEXT NOT NULL DEFAULT '',
                first_name TEXT,
                middle_name TEXT,
                last_name TEXT NOT NULL DEFAULT '',
                birthday TEXT,
                gender TEXT,
                graduation_year INTEGER,
                house TEXT,
                active BOOLEAN NOT NULL DEFAULT FALSE,
                password TEXT,
                email TEXT UNIQUE,
                last_login TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parents (
                crm_id TEXT PRIMARY KEY,
                canvas_id INTEGER,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT,
                phone TEXT,
                password TEXT,
                active BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS teachers (
                sis_id TEXT PRIMARY KEY,
                canvas_id INTEGER UNIQUE,
                teacher_name TEXT NOT NULL DEFAULT '',
                active BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grading_period_groups (
                gp_group_id INTEGER PRIMARY KEY,
                gp_group_name TEXT NOT NULL DEFAULT ''
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS terms (
                term_id INTEGER PRIMARY KEY,
                term_name TEXT NOT NULL,
                gp_group_id INTEGER REFERENCES grading_period_groups(gp_group_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grading_periods (
                period_id INTEGER PRIMARY KEY,
                period_name TEXT NOT NULL,
                gp_group_id INTEGER REFERENCES grading_period_groups(gp_group_id),
                note_column TEXT,
                midterm_column TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                canvas_id INTEGER PRIMARY KEY,
                sis_id TEXT UNIQUE,
                account_name TEXT NOT NULL DEFAULT '',
                parent_account_id INTEGER,
                root_account_id INTEGER
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grading_standards (
                standard_id INTEGER PRIMARY KEY,
                standard_title TEXT NOT NULL,
                grading_scheme TEXT NOT NULL DEFAULT '{}' -- JSON map letter -> cutoff
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courses (
                sis_id TEXT PRIMARY KEY,
                canvas_id INTEGER UNIQUE,
                term_id INTEGER REFERENCES terms(term_id),
                full_name TEXT NOT NULL DEFAULT '',
                print_name TEXT NOT NULL DEFAULT '',
                account_id TEXT REFERENCES accounts(sis_id),
                standard_id INTEGER REFERENCES grading_standards(standard_id),
                homeroom BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sections (
                section_id TEXT PRIMARY KEY,
                section_name TEXT NOT NULL DEFAULT '',
                course_id TEXT NOT NULL REFERENCES courses(sis_id) ON UPDATE CASCADE ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grade_records (
                grade_record_id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id TEXT NOT NULL REFERENCES students(sis_id) ON UPDATE CASCADE ON DELETE CASCADE,
                period_id INTEGER REFERENCES grading_periods(period_id),
                term_id INTEGER REFERENCES terms(term_id),
                course_id TEXT NOT NULL REFERENCES courses(sis_id) ON UPDATE CASCADE ON DELETE CASCADE,
                score REAL,
                grade TEXT,
                comment TEXT,
                quality_points REAL,
                midterm BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attendance (
                student_id TEXT NOT NULL REFERENCES students(sis_id),
                period_id INTEGER NOT NULL REFERENCES grading_periods(period_id),
                absences REAL NOT NULL DEFAULT 0,
                tardies INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (student_id, period_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crm_fields (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                label TEXT NOT NULL UNIQUE,
                column_name TEXT NOT NULL DEFAULT ''
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Join tables; the pair constraints keep re-linking idempotent
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS course_teachers (
                course_id TEXT NOT NULL REFERENCES courses(sis_id) ON DELETE CASCADE,
                teacher_id TEXT NOT NULL REFERENCES teachers(sis_id) ON DELETE CASCADE,
                PRIMARY KEY (course_id, teacher_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS student_parents (
                student_id TEXT NOT NULL REFERENCES students(sis_id) ON DELETE CASCADE,
                parent_id TEXT NOT NULL REFERENCES parents(crm_id) ON DELETE CASCADE,
                PRIMARY KEY (student_id, parent_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS student_sections (
                student_id TEXT NOT NULL REFERENCES students(sis_id) ON DELETE CASCADE,
                section_id TEXT NOT NULL REFERENCES sections(section_id) ON DELETE CASCADE,
                PRIMARY KEY (student_id, section_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_grade_records_lookup ON grade_records(student_id, course_id, period_id, midterm)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_grade_records_course ON grade_records(course_id, period_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sections_course ON sections(course_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_courses_term ON courses(term_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn stats(&self) -> DatabaseResult<DatabaseStats> {
        async fn count(pool: &SqlitePool, sql: &str) -> DatabaseResult<i64> {
            let row = sqlx::query(sql).fetch_one(pool).await?;
            Ok(row.get::<i64, _>(0))
        }

        Ok(DatabaseStats {
            students: count(&self.pool, "SELECT COUNT(*) FROM students").await?,
            active_students: count(
                &self.pool,
                "SELECT COUNT(*) FROM students WHERE active = TRUE",
            )
            .await?,
            parents: count(&self.pool, "SELECT COUNT(*) FROM parents").await?,
            teachers: count(&self.pool, "SELECT COUNT(*) FROM teachers").await?,
            courses: count(&self.pool, "SELECT COUNT(*) FROM courses").await?,
            sections: count(&self.pool, "SELECT COUNT(*) FROM sections").await?,
            grade_records: count(&self.pool, "SELECT COUNT(*) FROM grade_records").await?,
            attendance_records: count(&self.pool, "SELECT COUNT(*) FROM attendance").await?,
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping

fn opt_date(row: &SqliteRow, col: &str) -> DatabaseResult<Option<NaiveDate>> {
    let raw: Option<String> = row.get(col);
    match raw {
        Some(s) if !s.is_empty() => Ok(Some(NaiveDate::parse_from_str(&s, "%Y-%m-%d")?)),
        _ => Ok(None),
    }
}

fn opt_datetime(row: &SqliteRow, col: &str) -> DatabaseResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(col);
    match raw {
        Some(s) if !s.is_empty() => Ok(Some(DateTime::parse_from_rfc3339(&s)?.into())),
        _ => Ok(None),
    }
}

fn row_to_student(row: &SqliteRow) -> DatabaseResult<Student> {
    Ok(Student {
        sis_id: row.get("sis_id"),
        canvas_id: row.get("canvas_id"),
        common_name: row.get("common_name"),
        first_name: row.get("first_name"),
        middle_name: row.get("middle_name"),
        last_name: row.get("last_name"),
        birthday: opt_date(row, "birthday")?,
        gender: row.get("gender"),
        graduation_year: row.get::<Option<i64>, _>("graduation_year").map(|y| y as i32),
        house: row.get("house"),
        active: row.get("active"),
        password: row.get("password"),
        email: row.get("email"),
        last_login: opt_datetime(row, "last_login")?,
    })
}

fn row_to_parent(row: &SqliteRow) -> Parent {
    Parent {
        crm_id: row.get("crm_id"),
        canvas_id: row.get("canvas_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        password: row.get("password"),
        active: row.get("active"),
    }
}

fn row_to_teacher(row: &SqliteRow) -> Teacher {
    Teacher {
        sis_id: row.get("sis_id"),
        canvas_id: row.get("canvas_id"),
        teacher_name: row.get("teacher_name"),
        active: row.get("active"),
    }
}

fn row_to_term(row: &SqliteRow) -> Term {
    Term {
        term_id: row.get("term_id"),
        term_name: row.get("term_name"),
        gp_group_id: row.get("gp_group_id"),
    }
}

fn row_to_period(row: &SqliteRow) -> GradingPeriod {
    GradingPeriod {
        period_id: row.get("period_id"),
        period_name: row.get("period_name"),
        gp_group_id: row.get("gp_group_id"),
        note_column: row.get("note_column"),
        midterm_column: row.get("midterm_column"),
    }
}

fn row_to_course(row: &SqliteRow) -> Course {
    Course {
        sis_id: row.get("sis_id"),
        canvas_id: row.get("canvas_id"),
        term_id: row.get("term_id"),
        full_name: row.get("full_name"),
        print_name: row.get("print_name"),
        account_id: row.get("account_id"),
        standard_id: row.get("standard_id"),
        homeroom: row.get("homeroom"),
    }
}

fn row_to_section(row: &SqliteRow) -> Section {
    Section {
        section_id: row.get("section_id"),
        section_name: row.get("section_name"),
        course_id: row.get("course_id"),
    }
}

fn row_to_grade_record(row: &SqliteRow) -> GradeRecord {
    GradeRecord {
        id: Some(row.get("grade_record_id")),
        student_id: row.get("student_id"),
        period_id: row.get("period_id"),
        term_id: row.get("term_id"),
        course_id: row.get("course_id"),
        score: row.get("score"),
        grade: row.get("grade"),
        comment: row.get("comment"),
        quality_points: row.get("quality_points"),
        midterm: row.get("midterm"),
    }
}

// ---------------------------------------------------------------------------
// Students

impl Database {
    /// Insert or update a student by SIS id. Does not touch canvas_id,
    /// password, or email when the incoming record has none, so a CRM pull
    /// cannot erase Canvas bookkeeping.
    pub async fn upsert_student(&self, student: &Student) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO students (
                sis_id, canvas_id, common_name, first_name, middle_name, last_name,
                birthday, gender, graduation_year, house, active, password, email, last_login
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(sis_id) DO UPDATE SET
                canvas_id = COALESCE(excluded.canvas_id, students.canvas_id),
                common_name = excluded.common_name,
                first_name = excluded.first_name,
                middle_name = excluded.middle_name,
                last_name = excluded.last_name,
                birthday = COALESCE(excluded.birthday, students.birthday),
                gender = COALESCE(excluded.gender, students.gender),
                graduation_year = COALESCE(excluded.graduation_year, students.graduation_year),
                house = COALESCE(excluded.house, students.house),
                active = excluded.active,
                password = COALESCE(excluded.password, students.password),
                email = COALESCE(excluded.email, students.email),
                last_login = COALESCE(excluded.last_login, students.last_login)
        "#,
        )
        .bind(&student.sis_id)
        .bind(student.canvas_id)
        .bind(&student.common_name)
        .bind(&student.first_name)
        .bind(&student.middle_name)
        .bind(&student.last_name)
        .bind(student.birthday.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(&student.gender)
        .bind(student.graduation_year.map(|y| y as i64))
        .bind(&student.house)
        .bind(student.active)
        .bind(&student.password)
        .bind(&student.email)
        .bind(student.last_login.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_student(&self, sis_id: &str) -> DatabaseResult<Option<Student>> {
        let row = sqlx::query("SELECT * FROM students WHERE sis_id = ?1")
            .bind(sis_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_student).transpose()
    }

    pub async fn student_by_canvas_id(&self, canvas_id: i64) -> DatabaseResult<Option<Student>> {
        let row = sqlx::query("SELECT * FROM students WHERE canvas_id = ?1")
            .bind(canvas_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_student).transpose()
    }

    /// Deactivate every student; a fresh CRM pull re-activates current ones.
    pub async fn deactivate_students(&self) -> DatabaseResult<()> {
        sqlx::query("UPDATE students SET active = FALSE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active students whose SIS id starts with the given prefix, ordered
    /// by last name. An empty prefix matches everyone.
    pub async fn active_students(&self, id_prefix: &str) -> DatabaseResult<Vec<Student>> {
        let rows = sqlx::query(
            "SELECT * FROM students WHERE active = TRUE AND sis_id LIKE ?1 || '%' ORDER BY last_name, common_name",
        )
        .bind(id_prefix)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_student).collect()
    }

    pub async fn all_students(&self, id_prefix: &str) -> DatabaseResult<Vec<Student>> {
        let rows =
            sqlx::query("SELECT * FROM students WHERE sis_id LIKE ?1 || '%' ORDER BY sis_id")
                .bind(id_prefix)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_student).collect()
    }

    /// Highest SIS id with the given prefix, if any exist.
    pub async fn highest_student_id(&self, id_prefix: &str) -> DatabaseResult<Option<String>> {
        let row = sqlx::query(
            "SELECT sis_id FROM students WHERE sis_id LIKE ?1 || '%' ORDER BY sis_id DESC LIMIT 1",
        )
        .bind(id_prefix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("sis_id")))
    }

    pub async fn set_student_canvas_id(
        &self,
        sis_id: &str,
        canvas_id: Option<i64>,
    ) -> DatabaseResult<()> {
        sqlx::query("UPDATE students SET canvas_id = ?1 WHERE sis_id = ?2")
            .bind(canvas_id)
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set a student's email; a duplicate address is reported as
    /// `UniqueViolation` so the caller can retry with a longer slug.
    pub async fn set_student_email(&self, sis_id: &str, email: &str) -> DatabaseResult<()> {
        let result = sqlx::query("UPDATE students SET email = ?1 WHERE sis_id = ?2")
            .bind(email)
            .bind(sis_id)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::UniqueViolation(email.to_string()))
            }
            Err(e) => Err(DatabaseError::Connection(e)),
        }
    }

    pub async fn set_student_password(&self, sis_id: &str, password: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE students SET password = ?1 WHERE sis_id = ?2")
            .bind(password)
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Forget a stored password once the student has logged in with it.
    pub async fn clear_student_password(&self, sis_id: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE students SET password = NULL WHERE sis_id = ?1")
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_student_house(&self, sis_id: &str, house: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE students SET house = ?1 WHERE sis_id = ?2")
            .bind(house)
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_student_graduation_year(
        &self,
        sis_id: &str,
        graduation_year: i32,
    ) -> DatabaseResult<()> {
        sqlx::query("UPDATE students SET graduation_year = ?1 WHERE sis_id = ?2")
            .bind(graduation_year as i64)
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active students still without a generated password.
    pub async fn students_missing_password(&self) -> DatabaseResult<Vec<Student>> {
        let rows =
            sqlx::query("SELECT * FROM students WHERE active = TRUE AND password IS NULL")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_student).collect()
    }
}

// ---------------------------------------------------------------------------
// Parents

impl Database {
    pub async fn upsert_parent(&self, parent: &Parent) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parents (crm_id, canvas_id, first_name, last_name, email, phone, password, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(crm_id) DO UPDATE SET
                canvas_id = COALESCE(excluded.canvas_id, parents.canvas_id),
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = COALESCE(excluded.email, parents.email),
                phone = COALESCE(excluded.phone, parents.phone),
                password = COALESCE(excluded.password, parents.password),
                active = excluded.active
        "#,
        )
        .bind(&parent.crm_id)
        .bind(parent.canvas_id)
        .bind(&parent.first_name)
        .bind(&parent.last_name)
        .bind(&parent.email)
        .bind(&parent.phone)
        .bind(&parent.password)
        .bind(parent.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate_parents(&self) -> DatabaseResult<()> {
        sqlx::query("UPDATE parents SET active = FALSE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_parent_active(&self, crm_id: &str, active: bool) -> DatabaseResult<()> {
        sqlx::query("UPDATE parents SET active = ?1 WHERE crm_id = ?2")
            .bind(active)
            .bind(crm_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_parents(&self) -> DatabaseResult<Vec<Parent>> {
        let rows = sqlx::query("SELECT * FROM parents ORDER BY last_name, first_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_parent).collect())
    }

    pub async fn active_parents(&self) -> DatabaseResult<Vec<Parent>> {
        let rows = sqlx::query(
            "SELECT * FROM parents WHERE active = TRUE ORDER BY last_name, first_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_parent).collect())
    }

    pub async fn clear_student_parents(&self, sis_id: &str) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM student_parents WHERE student_id = ?1")
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn link_student_parent(&self, sis_id: &str, crm_id: &str) -> DatabaseResult<()> {
        sqlx::query("INSERT OR IGNORE INTO student_parents (student_id, parent_id) VALUES (?1, ?2)")
            .bind(sis_id)
            .bind(crm_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn student_parents(&self, sis_id: &str) -> DatabaseResult<Vec<Parent>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM parents p
            JOIN student_parents sp ON sp.parent_id = p.crm_id
            WHERE sp.student_id = ?1
            ORDER BY p.crm_id
        "#,
        )
        .bind(sis_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_parent).collect())
    }

    pub async fn parent_students(&self, crm_id: &str) -> DatabaseResult<Vec<Student>> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM students s
            JOIN student_parents sp ON sp.student_id = s.sis_id
            WHERE sp.parent_id = ?1
            ORDER BY s.graduation_year DESC
        "#,
        )
        .bind(crm_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_student).collect()
    }
}

// ---------------------------------------------------------------------------
// Teachers

impl Database {
    pub async fn upsert_teacher(&self, teacher: &Teacher) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO teachers (sis_id, canvas_id, teacher_name, active)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(sis_id) DO UPDATE SET
                canvas_id = COALESCE(excluded.canvas_id, teachers.canvas_id),
                teacher_name = excluded.teacher_name,
                active = excluded.active
        "#,
        )
        .bind(&teacher.sis_id)
        .bind(teacher.canvas_id)
        .bind(&teacher.teacher_name)
        .bind(teacher.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate_teachers(&self) -> DatabaseResult<()> {
        sqlx::query("UPDATE teachers SET active = FALSE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_teacher(&self, sis_id: &str) -> DatabaseResult<Option<Teacher>> {
        let row = sqlx::query("SELECT * FROM teachers WHERE sis_id = ?1")
            .bind(sis_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_teacher))
    }

    pub async fn clear_course_teachers(&self, course_id: &str) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM course_teachers WHERE course_id = ?1")
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn link_course_teacher(&self, course_id: &str, teacher_id: &str) -> DatabaseResult<()> {
        sqlx::query("INSERT OR IGNORE INTO course_teachers (course_id, teacher_id) VALUES (?1, ?2)")
            .bind(course_id)
            .bind(teacher_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn course_teachers(&self, course_id: &str) -> DatabaseResult<Vec<Teacher>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM teachers t
            JOIN course_teachers ct ON ct.teacher_id = t.sis_id
            WHERE ct.course_id = ?1
            ORDER BY t.sis_id
        "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_teacher).collect())
    }
}

// ---------------------------------------------------------------------------
// Terms and grading periods

impl Database {
    pub async fn upsert_gp_group(&self, group: &GradingPeriodGroup) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grading_period_groups (gp_group_id, gp_group_name)
            VALUES (?1, ?2)
            ON CONFLICT(gp_group_id) DO UPDATE SET gp_group_name = excluded.gp_group_name
        "#,
        )
        .bind(group.gp_group_id)
        .bind(&group.gp_group_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_term(&self, term: &Term) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO terms (term_id, term_name, gp_group_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(term_id) DO UPDATE SET
                term_name = excluded.term_name,
                gp_group_id = COALESCE(excluded.gp_group_id, terms.gp_group_id)
        "#,
        )
        .bind(term.term_id)
        .bind(&term.term_name)
        .bind(term.gp_group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn term_by_name(&self, name: &str) -> DatabaseResult<Option<Term>> {
        let row = sqlx::query("SELECT * FROM terms WHERE term_name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_term))
    }

    pub async fn term_by_id(&self, term_id: i64) -> DatabaseResult<Option<Term>> {
        let row = sqlx::query("SELECT * FROM terms WHERE term_id = ?1")
            .bind(term_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_term))
    }

    /// Terms that are linked to a grading-period group.
    pub async fn terms_with_groups(&self) -> DatabaseResult<Vec<Term>> {
        let rows = sqlx::query("SELECT * FROM terms WHERE gp_group_id IS NOT NULL ORDER BY term_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_term).collect())
    }

    /// The first term sharing the period's group (periods link to terms
    /// only through the group, as in Canvas).
    pub async fn term_for_period(&self, period: &GradingPeriod) -> DatabaseResult<Option<Term>> {
        let Some(group) = period.gp_group_id else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT * FROM terms WHERE gp_group_id = ?1 ORDER BY term_id LIMIT 1")
            .bind(group)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_term))
    }

    pub async fn upsert_grading_period(&self, period: &GradingPeriod) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grading_periods (period_id, period_name, gp_group_id, note_column, midterm_column)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(period_id) DO UPDATE SET
                period_name = excluded.period_name,
                gp_group_id = COALESCE(excluded.gp_group_id, grading_periods.gp_group_id),
                note_column = COALESCE(excluded.note_column, grading_periods.note_column),
                midterm_column = COALESCE(excluded.midterm_column, grading_periods.midterm_column)
        "#,
        )
        .bind(period.period_id)
        .bind(&period.period_name)
        .bind(period.gp_group_id)
        .bind(&period.note_column)
        .bind(&period.midterm_column)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn period_by_id(&self, period_id: i64) -> DatabaseResult<Option<GradingPeriod>> {
        let row = sqlx::query("SELECT * FROM grading_periods WHERE period_id = ?1")
            .bind(period_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_period))
    }

    pub async fn period_in_group(
        &self,
        gp_group_id: i64,
        period_name: &str,
    ) -> DatabaseResult<Option<GradingPeriod>> {
        let row = sqlx::query(
            "SELECT * FROM grading_periods WHERE gp_group_id = ?1 AND period_name = ?2",
        )
        .bind(gp_group_id)
        .bind(period_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_period))
    }

    pub async fn periods_in_group(&self, gp_group_id: i64) -> DatabaseResult<Vec<GradingPeriod>> {
        let rows = sqlx::query(
            "SELECT * FROM grading_periods WHERE gp_group_id = ?1 ORDER BY period_id",
        )
        .bind(gp_group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_period).collect())
    }

    /// All periods of the group up to and including the given one, ordered
    /// by id. Period ids stand in for dates, which Canvas does not return
    /// here.
    pub async fn cumulative_periods(
        &self,
        period: &GradingPeriod,
    ) -> DatabaseResult<Vec<GradingPeriod>> {
        let Some(group) = period.gp_group_id else {
            return Ok(vec![period.clone()]);
        };
        let rows = sqlx::query(
            "SELECT * FROM grading_periods WHERE gp_group_id = ?1 AND period_id <= ?2 ORDER BY period_id",
        )
        .bind(group)
        .bind(period.period_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_period).collect())
    }

    pub async fn set_period_comment_column(
        &self,
        period_id: i64,
        midterm: bool,
        name: &str,
    ) -> DatabaseResult<()> {
        let sql = if midterm {
            "UPDATE grading_periods SET midterm_column = ?1 WHERE period_id = ?2"
        } else {
            "UPDATE grading_periods SET note_column = ?1 WHERE period_id = ?2"
        };
        sqlx::query(sql)
            .bind(name)
            .bind(period_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Courses and sections

impl Database {
    pub async fn upsert_course(&self, course: &Course) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO courses (sis_id, canvas_id, term_id, full_name, print_name, account_id, standard_id, homeroom)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(sis_id) DO UPDATE SET
                canvas_id = COALESCE(excluded.canvas_id, courses.canvas_id),
                term_id = COALESCE(excluded.term_id, courses.term_id),
                full_name = excluded.full_name,
                print_name = excluded.print_name,
                account_id = COALESCE(excluded.account_id, courses.account_id),
                standard_id = COALESCE(excluded.standard_id, courses.standard_id),
                homeroom = excluded.homeroom
        "#,
        )
        .bind(&course.sis_id)
        .bind(course.canvas_id)
        .bind(course.term_id)
        .bind(&course.full_name)
        .bind(&course.print_name)
        .bind(&course.account_id)
        .bind(course.standard_id)
        .bind(course.homeroom)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn course_by_sis_id(&self, sis_id: &str) -> DatabaseResult<Option<Course>> {
        let row = sqlx::query("SELECT * FROM courses WHERE sis_id = ?1")
            .bind(sis_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_course))
    }

    pub async fn course_by_canvas_id(&self, canvas_id: i64) -> DatabaseResult<Option<Course>> {
        let row = sqlx::query("SELECT * FROM courses WHERE canvas_id = ?1")
            .bind(canvas_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_course))
    }

    pub async fn term_courses(&self, term_id: i64) -> DatabaseResult<Vec<Course>> {
        let rows = sqlx::query("SELECT * FROM courses WHERE term_id = ?1 ORDER BY sis_id")
            .bind(term_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_course).collect())
    }

    pub async fn homeroom_courses(&self, term_id: i64) -> DatabaseResult<Vec<Course>> {
        let rows = sqlx::query(
            "SELECT * FROM courses WHERE term_id = ?1 AND homeroom = TRUE ORDER BY sis_id",
        )
        .bind(term_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_course).collect())
    }

    pub async fn set_course_homeroom(&self, sis_id: &str, homeroom: bool) -> DatabaseResult<()> {
        sqlx::query("UPDATE courses SET homeroom = ?1 WHERE sis_id = ?2")
            .bind(homeroom)
            .bind(sis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_section(&self, section: &Section) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sections (section_id, section_name, course_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(section_id) DO UPDATE SET
                section_name = excluded.section_name,
                course_id = excluded.course_id
        "#,
        )
        .bind(&section.section_id)
        .bind(&section.section_name)
        .bind(&section.course_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn course_sections(&self, course_id: &str) -> DatabaseResult<Vec<Section>> {
        let rows = sqlx::query("SELECT * FROM sections WHERE course_id = ?1 ORDER BY section_name")
            .bind(course_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_section).collect())
    }

    /// Remove student links for all of a course's sections ahead of a
    /// fresh enrollment pull. Orphan sections are left alone.
    pub async fn clear_course_enrollment(&self, course_id: &str) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            DELETE FROM student_sections
            WHERE section_id IN (SELECT section_id FROM sections WHERE course_id = ?1)
        "#,
        )
        .bind(course_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn link_section_student(&self, section_id: &str, sis_id: &str) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO student_sections (student_id, section_id) VALUES (?1, ?2)",
        )
        .bind(sis_id)
        .bind(section_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn section_students(&self, section_id: &str) -> DatabaseResult<Vec<Student>> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM students s
            JOIN student_sections ss ON ss.student_id = s.sis_id
            WHERE ss.section_id = ?1
            ORDER BY s.last_name, s.common_name
        "#,
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_student).collect()
    }

    /// Courses a student is enrolled in for the given term.
    pub async fn student_courses(&self, sis_id: &str, term_id: i64) -> DatabaseResult<Vec<Course>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT c.* FROM courses c
            JOIN sections sec ON sec.course_id = c.sis_id
            JOIN student_sections ss ON ss.section_id = sec.section_id
            WHERE ss.student_id = ?1 AND c.term_id = ?2
            ORDER BY c.sis_id
        "#,
        )
        .bind(sis_id)
        .bind(term_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_course).collect())
    }

    /// First homeroom teacher for a student in the given term, if any.
    pub async fn homeroom_teacher(
        &self,
        sis_id: &str,
        term_id: i64,
    ) -> DatabaseResult<Option<Teacher>> {
        let row = sqlx::query(
            r#"
            SELECT t.* FROM teachers t
            JOIN course_teachers ct ON ct.teacher_id = t.sis_id
            JOIN courses c ON c.sis_id = ct.course_id
            JOIN sections sec ON sec.course_id = c.sis_id
            JOIN student_sections ss ON ss.section_id = sec.section_id
            WHERE ss.student_id = ?1 AND c.term_id = ?2 AND c.homeroom = TRUE
            ORDER BY c.sis_id, t.sis_id
            LIMIT 1
        "#,
        )
        .bind(sis_id)
        .bind(term_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_teacher))
    }
}

// ---------------------------------------------------------------------------
// Grade records and attendance

impl Database {
    /// Clear a course's records for one period before re-pulling them.
    pub async fn delete_period_records(
        &self,
        course_id: &str,
        period_id: i64,
        midterm: bool,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "DELETE FROM grade_records WHERE course_id = ?1 AND period_id = ?2 AND midterm = ?3",
        )
        .bind(course_id)
        .bind(period_id)
        .bind(midterm)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear a course's final (term) records before re-pulling them.
    pub async fn delete_term_records(&self, course_id: &str, term_id: i64) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM grade_records WHERE course_id = ?1 AND term_id = ?2")
            .bind(course_id)
            .bind(term_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_grade_record(&self, record: &GradeRecord) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grade_records (student_id, period_id, term_id, course_id, score, grade, comment, quality_points, midterm)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        )
        .bind(&record.student_id)
        .bind(record.period_id)
        .bind(record.term_id)
        .bind(&record.course_id)
        .bind(record.score)
        .bind(&record.grade)
        .bind(&record.comment)
        .bind(record.quality_points)
        .bind(record.midterm)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn grade_record(
        &self,
        student_id: &str,
        course_id: &str,
        period_id: i64,
        midterm: bool,
    ) -> DatabaseResult<Option<GradeRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM grade_records
            WHERE student_id = ?1 AND course_id = ?2 AND period_id = ?3 AND midterm = ?4
        "#,
        )
        .bind(student_id)
        .bind(course_id)
        .bind(period_id)
        .bind(midterm)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_grade_record))
    }

    pub async fn final_grade_record(
        &self,
        student_id: &str,
        course_id: &str,
        term_id: i64,
    ) -> DatabaseResult<Option<GradeRecord>> {
        let row = sqlx::query(
            "SELECT * FROM grade_records WHERE student_id = ?1 AND course_id = ?2 AND term_id = ?3",
        )
        .bind(student_id)
        .bind(course_id)
        .bind(term_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_grade_record))
    }

    pub async fn has_period_records(
        &self,
        course_id: &str,
        period_id: i64,
        midterm: bool,
    ) -> DatabaseResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM grade_records WHERE course_id = ?1 AND period_id = ?2 AND midterm = ?3",
        )
        .bind(course_id)
        .bind(period_id)
        .bind(midterm)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    pub async fn set_grade_comment(
        &self,
        student_id: &str,
        course_id: &str,
        period_id: i64,
        midterm: bool,
        comment: &str,
    ) -> DatabaseResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE grade_records SET comment = ?1
            WHERE student_id = ?2 AND course_id = ?3 AND period_id = ?4 AND midterm = ?5
        "#,
        )
        .bind(comment)
        .bind(student_id)
        .bind(course_id)
        .bind(period_id)
        .bind(midterm)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "grade record for student {student_id} in course {course_id}"
            )));
        }
        Ok(())
    }

    /// All non-midterm records for a period, for spreadsheet export.
    pub async fn period_records(
        &self,
        period_id: i64,
        midterm: bool,
    ) -> DatabaseResult<Vec<GradeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM grade_records WHERE period_id = ?1 AND midterm = ?2 ORDER BY course_id, student_id",
        )
        .bind(period_id)
        .bind(midterm)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_grade_record).collect())
    }

    pub async fn delete_attendance_for_period(&self, period_id: i64) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM attendance WHERE period_id = ?1")
            .bind(period_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_attendance(&self, record: &Attendance) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO attendance (student_id, period_id, absences, tardies)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id, period_id) DO UPDATE SET
                absences = excluded.absences,
                tardies = excluded.tardies
        "#,
        )
        .bind(&record.student_id)
        .bind(record.period_id)
        .bind(record.absences)
        .bind(record.tardies)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn attendance_for(
        &self,
        student_id: &str,
        period_id: i64,
    ) -> DatabaseResult<Option<Attendance>> {
        let row = sqlx::query(
            "SELECT * FROM attendance WHERE student_id = ?1 AND period_id = ?2",
        )
        .bind(student_id)
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Attendance {
            student_id: r.get("student_id"),
            period_id: r.get("period_id"),
            absences: r.get("absences"),
            tardies: r.get("tardies"),
        }))
    }
}

// ---------------------------------------------------------------------------
// Accounts, grading standards, CRM field map

impl Database {
    pub async fn upsert_account(&self, account: &Account) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (canvas_id, sis_id, account_name, parent_account_id, root_account_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(canvas_id) DO UPDATE SET
                sis_id = COALESCE(excluded.sis_id, accounts.sis_id),
                account_name = excluded.account_name,
                parent_account_id = excluded.parent_account_id,
                root_account_id = excluded.root_account_id
        "#,
        )
        .bind(account.canvas_id)
        .bind(&account.sis_id)
        .bind(&account.account_name)
        .bind(account.parent_account_id)
        .bind(account.root_account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn account_by_name(&self, name: &str) -> DatabaseResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE account_name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Account {
            canvas_id: r.get("canvas_id"),
            sis_id: r.get("sis_id"),
            account_name: r.get("account_name"),
            parent_account_id: r.get("parent_account_id"),
            root_account_id: r.get("root_account_id"),
        }))
    }

    pub async fn upsert_grading_standard(&self, standard: &GradingStandard) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grading_standards (standard_id, standard_title, grading_scheme)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(standard_id) DO UPDATE SET
                standard_title = excluded.standard_title,
                grading_scheme = excluded.grading_scheme
        "#,
        )
        .bind(standard.standard_id)
        .bind(&standard.standard_title)
        .bind(serde_json::to_string(&standard.grading_scheme)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn standard_by_title(&self, title: &str) -> DatabaseResult<Option<GradingStandard>> {
        let row = sqlx::query("SELECT * FROM grading_standards WHERE standard_title = ?1")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let scheme_json: String = r.get("grading_scheme");
                Ok(Some(GradingStandard {
                    standard_id: r.get("standard_id"),
                    standard_title: r.get("standard_title"),
                    grading_scheme: serde_json::from_str(&scheme_json)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Wipe and refill the CRM custom-field map.
    pub async fn replace_crm_fields(&self, fields: &[CrmField]) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM crm_fields")
            .execute(&self.pool)
            .await?;
        for field in fields {
            sqlx::query(
                "INSERT INTO crm_fields (id, name, label, column_name) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(field.id)
            .bind(&field.name)
            .bind(&field.label)
            .bind(&field.column_name)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn crm_field_by_label(&self, label: &str) -> DatabaseResult<CrmField> {
        let row = sqlx::query("SELECT * FROM crm_fields WHERE label = ?1")
            .bind(label)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("CRM field '{label}'")))?;
        Ok(CrmField {
            id: row.get("id"),
            name: row.get("name"),
            label: row.get("label"),
            column_name: row.get("column_name"),
        })
    }

    pub async fn crm_field_by_id(&self, id: i64) -> DatabaseResult<Option<CrmField>> {
        let row = sqlx::query("SELECT * FROM crm_fields WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CrmField {
            id: r.get("id"),
            name: r.get("name"),
            label: r.get("label"),
            column_name: r.get("column_name"),
        }))
    }
}
