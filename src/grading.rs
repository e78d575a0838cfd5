//! Letter-grade and grade-level lookup logic.
//!
//! These are the only computations in the system: quality-point and letter
//! lookup tables plus graduation-year arithmetic. Everything is a pure
//! function so the tables can be tested directly.

use chrono::{Datelike, NaiveDate};

/// Quality points for a letter grade on the upper-school scale.
/// Pass/Fail and blank grades carry no quality points.
pub fn quality_points(grade: &str) -> Option<f64> {
    match grade {
        "A" => Some(4.0),
        "B+" => Some(3.5),
        "B" => Some(3.0),
        "C+" => Some(2.5),
        "C" => Some(2.0),
        "D" => Some(1.0),
        "F" => Some(0.0),
        _ => None,
    }
}

/// Letter on the ten-point scale for computed composite scores (used where
/// a course average has no letter of its own). Scores in (0, 1] are read
/// as fractions and scaled to 100.
pub fn ten_point_letter(score: f64) -> &'static str {
    let score = if score > 0.0 && score <= 1.0 {
        score * 100.0
    } else {
        score
    };

    if score == 0.0 {
        ""
    } else if score < 59.5 {
        "F"
    } else if score < 69.5 {
        "D"
    } else if score < 79.5 {
        "C"
    } else if score < 89.5 {
        "B"
    } else if score <= 105.0 {
        "A"
    } else {
        "Error"
    }
}

/// Graduation year of the current senior class for a given date.
/// The year rolls over on June 1.
pub fn rollover_grad_year(today: NaiveDate) -> i32 {
    if today.month() >= 6 {
        today.year() + 1
    } else {
        today.year()
    }
}

/// Integer grade level for a student: 12 is a senior, K is 0, JK is -1.
pub fn grade_level(graduation_year: i32, current_grad_year: i32) -> i32 {
    12 - (graduation_year - current_grad_year)
}

/// Graduation year implied by a grade level.
pub fn graduation_year_for(grade: i32, current_grad_year: i32) -> i32 {
    current_grad_year + 12 - grade
}

/// Printable label for a grade level.
pub fn grade_label(level: i32) -> String {
    match level {
        -1 => "JK".to_string(),
        0 => "K".to_string(),
        1..=12 => level.to_string(),
        _ => "?".to_string(),
    }
}

/// Format a percent score with one decimal place, blank when missing.
pub fn score_to_print(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{s:.1}%"),
        None => String::new(),
    }
}

/// Format a percent score rounded to a whole number, blank when missing.
pub fn score_to_round(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{}%", s.round() as i64),
        None => String::new(),
    }
}

/// Format an absence count without a trailing `.0` (half-days keep `.5`).
pub fn absences_to_print(absences: f64) -> String {
    if absences == 0.0 {
        "0".to_string()
    } else if absences.fract() == 0.0 {
        format!("{}", absences as i64)
    } else {
        format!("{absences}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_point_table() {
        assert_eq!(quality_points("A"), Some(4.0));
        assert_eq!(quality_points("B+"), Some(3.5));
        assert_eq!(quality_points("B"), Some(3.0));
        assert_eq!(quality_points("C+"), Some(2.5));
        assert_eq!(quality_points("C"), Some(2.0));
        assert_eq!(quality_points("D"), Some(1.0));
        assert_eq!(quality_points("F"), Some(0.0));
        assert_eq!(quality_points("Pass"), None);
        assert_eq!(quality_points(""), None);
    }

    #[test]
    fn ten_point_scale_boundaries() {
        assert_eq!(ten_point_letter(0.0), "");
        assert_eq!(ten_point_letter(59.4), "F");
        assert_eq!(ten_point_letter(59.5), "D");
        assert_eq!(ten_point_letter(69.5), "C");
        assert_eq!(ten_point_letter(79.5), "B");
        assert_eq!(ten_point_letter(89.5), "A");
        assert_eq!(ten_point_letter(105.0), "A");
        assert_eq!(ten_point_letter(106.0), "Error");
    }

    #[test]
    fn fractional_scores_are_scaled() {
        assert_eq!(ten_point_letter(0.85), "B");
        assert_eq!(ten_point_letter(0.95), "A");
    }

    #[test]
    fn grad_year_rolls_over_in_june() {
        let may = NaiveDate::from_ymd_opt(2026, 5, 31).unwrap();
        let june = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(rollover_grad_year(may), 2026);
        assert_eq!(rollover_grad_year(june), 2027);
    }

    #[test]
    fn grade_level_arithmetic() {
        assert_eq!(grade_level(2026, 2026), 12);
        assert_eq!(grade_level(2030, 2026), 8);
        assert_eq!(grade_level(2038, 2026), 0); // kindergarten
        assert_eq!(graduation_year_for(8, 2026), 2030);
        assert_eq!(grade_label(0), "K");
        assert_eq!(grade_label(-1), "JK");
        assert_eq!(grade_label(7), "7");
    }

    #[test]
    fn score_formatting() {
        assert_eq!(score_to_print(Some(85.25)), "85.2%");
        assert_eq!(score_to_print(None), "");
        assert_eq!(score_to_round(Some(85.5)), "86%");
        assert_eq!(absences_to_print(0.0), "0");
        assert_eq!(absences_to_print(2.0), "2");
        assert_eq!(absences_to_print(1.5), "1.5");
    }
}
