//! Annual acquisition windows, including windows that wrap the new year

use crate::types::{LtError, LtResult};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Compiled once and shared by every `MonthDay` parse
fn month_day_pattern() -> LtResult<&'static Regex> {
    static MONTH_DAY_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    MONTH_DAY_RE
        .get_or_init(|| Regex::new(r"^(\d{1,2})-(\d{1,2})$"))
        .as_ref()
        .map_err(|e| LtError::Processing(format!("Month-day pattern error: {}", e)))
}

/// Calendar month-day, written `MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    pub const JANUARY_FIRST: MonthDay = MonthDay { month: 1, day: 1 };
    pub const DECEMBER_LAST: MonthDay = MonthDay { month: 12, day: 31 };

    pub fn new(month: u32, day: u32) -> LtResult<Self> {
        // Feb 29 is accepted here and clamped per year in `date_in`
        let max_day = match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => 29,
            _ => {
                return Err(LtError::InvalidFormat(format!(
                    "Month {} out of range in month-day {:02}-{:02}",
                    month, month, day
                )))
            }
        };
        if day == 0 || day > max_day {
            return Err(LtError::InvalidFormat(format!(
                "Day {} out of range in month-day {:02}-{:02}",
                day, month, day
            )));
        }
        Ok(Self { month, day })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// Concrete date in `year`; Feb 29 becomes Feb 28 outside leap years
    pub fn date_in(&self, year: i32) -> LtResult<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .or_else(|| NaiveDate::from_ymd_opt(year, self.month, self.day - 1))
            .ok_or_else(|| LtError::InvalidFormat(format!("No date {}-{} in year {}", self.month, self.day, year)))
    }
}

impl std::str::FromStr for MonthDay {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        let caps = month_day_pattern()?
            .captures(s.trim())
            .ok_or_else(|| LtError::InvalidFormat(format!("Expected month-day as MM-DD, got '{}'", s)))?;

        let month = caps[1]
            .parse::<u32>()
            .map_err(|e| LtError::InvalidFormat(format!("Parse error in '{}': {}", s, e)))?;
        let day = caps[2]
            .parse::<u32>()
            .map_err(|e| LtError::InvalidFormat(format!("Parse error in '{}': {}", s, e)))?;
        MonthDay::new(month, day)
    }
}

impl std::fmt::Display for MonthDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// One concrete date range to query: `year-start` (inclusive) to `year-end` (exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub year: i32,
    pub start: MonthDay,
    pub end: MonthDay,
}

impl QueryWindow {
    /// Half-open date range `[start, end)`
    pub fn date_range(&self) -> LtResult<(NaiveDate, NaiveDate)> {
        Ok((self.start.date_in(self.year)?, self.end.date_in(self.year)?))
    }

    /// `(year, "MM-DD", "MM-DD")`
    pub fn to_tuple(&self) -> (i32, String, String) {
        (self.year, self.start.to_string(), self.end.to_string())
    }
}

/// Requested acquisition window for one composite year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnualWindow {
    pub year: i32,
    pub start: MonthDay,
    pub end: MonthDay,
}

impl AnnualWindow {
    pub fn new(year: i32, start_day: &str, end_day: &str) -> LtResult<Self> {
        Ok(Self {
            year,
            start: start_day.parse()?,
            end: end_day.parse()?,
        })
    }

    /// Same month-day span moved to another year
    pub fn for_year(&self, year: i32) -> Self {
        Self { year, ..*self }
    }

    /// A window wraps when its start month comes after its end month
    pub fn wraps_year(&self) -> bool {
        self.start.month() > self.end.month()
    }

    /// Concrete per-year ranges to query; a wrapping window draws its head
    /// from the previous year and its tail from the composite year.
    pub fn resolve(&self) -> Vec<QueryWindow> {
        if self.wraps_year() {
            vec![
                QueryWindow {
                    year: self.year - 1,
                    start: self.start,
                    end: MonthDay::DECEMBER_LAST,
                },
                QueryWindow {
                    year: self.year,
                    start: MonthDay::JANUARY_FIRST,
                    end: self.end,
                },
            ]
        } else {
            vec![QueryWindow {
                year: self.year,
                start: self.start,
                end: self.end,
            }]
        }
    }
}

/// Resolve `(year, startDay, endDay)` into the query windows to merge
pub fn resolve_window(year: i32, start_day: &str, end_day: &str) -> LtResult<Vec<QueryWindow>> {
    let window = AnnualWindow::new(year, start_day, end_day)?;
    let resolved = window.resolve();
    log::debug!(
        "Resolved window {} {}..{} into {} query range(s)",
        year,
        window.start,
        window.end,
        resolved.len()
    );
    Ok(resolved)
}
