//! School-day calendar for attendance roll books.
//!
//! Builds the list of class days between the configured year start and end,
//! skipping holidays and non-class weekdays, and chunks them into pages.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// How many date columns fit on one roll-book page.
pub const DATES_PER_PAGE: usize = 18;

/// Weekdays on which a division meets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayMask(u8);

impl WeekdayMask {
    pub const WEEKDAYS: WeekdayMask = WeekdayMask(0b0001_1111);

    pub fn new(days: &[Weekday]) -> Self {
        let mut bits = 0u8;
        for day in days {
            bits |= 1 << day.num_days_from_monday().min(6);
        }
        WeekdayMask(bits)
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday().min(6)) != 0
    }
}

#[derive(Debug, Clone)]
pub struct SchoolCalendar {
    start: NaiveDate,
    end: NaiveDate,
    holidays: Vec<(NaiveDate, NaiveDate)>,
}

impl SchoolCalendar {
    pub fn new(start: NaiveDate, end: NaiveDate, holidays: Vec<(NaiveDate, NaiveDate)>) -> Self {
        Self { start, end, holidays }
    }

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays
            .iter()
            .any(|(from, to)| date >= *from && date <= *to)
    }

    /// All class days for a division, in order.
    pub fn school_days(&self, mask: WeekdayMask) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut date = self.start;
        while date <= self.end {
            if mask.contains(date.weekday()) && !self.is_holiday(date) {
                days.push(date);
            }
            date += Duration::days(1);
        }
        days
    }

    /// Class days chunked into roll-book pages.
    pub fn pages(&self, mask: WeekdayMask, per_page: usize) -> Vec<Vec<NaiveDate>> {
        self.school_days(mask)
            .chunks(per_page.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn skips_weekends_and_holidays() {
        // 2026-01-05 is a Monday; holiday on the Wednesday
        let cal = SchoolCalendar::new(
            date(2026, 1, 5),
            date(2026, 1, 11),
            vec![(date(2026, 1, 7), date(2026, 1, 7))],
        );
        let days = cal.school_days(WeekdayMask::WEEKDAYS);
        assert_eq!(
            days,
            vec![date(2026, 1, 5), date(2026, 1, 6), date(2026, 1, 8), date(2026, 1, 9)]
        );
    }

    #[test]
    fn mask_limits_weekdays() {
        let cal = SchoolCalendar::new(date(2026, 1, 5), date(2026, 1, 9), vec![]);
        let mask = WeekdayMask::new(&[Weekday::Tue, Weekday::Thu]);
        let days = cal.school_days(mask);
        assert_eq!(days, vec![date(2026, 1, 6), date(2026, 1, 8)]);
    }

    #[test]
    fn pages_chunk_in_order() {
        let cal = SchoolCalendar::new(date(2026, 1, 5), date(2026, 1, 30), vec![]);
        let pages = cal.pages(WeekdayMask::WEEKDAYS, 10);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 10);
        assert!(pages[1].len() <= 10);
    }
}
