use chrono::{NaiveDate, NaiveTime};

use crate::error::SvidError;

/// an inclusive date window over panorama capture times. both bounds are
/// optional; an unbounded range admits everything, including records with
/// no usable capture date.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// parses ISO `YYYY-MM-DD` bounds. malformed values are rejected up
    /// front so no network work happens before the failure.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, SvidError> {
        Ok(Self {
            start: parse_bound(start, "start_date")?,
            end: parse_bound(end, "end_date")?,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// month-granularity test used for Street View records, where capture
    /// time is a `(year, month)` pair. the pair is compared as the first
    /// day of its month, inclusive on both ends. records without a usable
    /// pair pass an unbounded range and fail a bounded one.
    pub fn contains_year_month(&self, year: &str, month: &str) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let date = match (year.parse::<i32>(), month.parse::<u32>()) {
            (Ok(y), Ok(m)) => NaiveDate::from_ymd_opt(y, m, 1),
            _ => None,
        };
        let Some(date) = date else {
            return false;
        };
        if let Some(start) = self.start {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if date > end {
                return false;
            }
        }
        true
    }

    /// millisecond-epoch test used for Mapillary records. the window spans
    /// from 00:00:00.000 on `start` through 23:59:59.999 on `end`.
    pub fn contains_epoch_ms(&self, ms: i64) -> bool {
        if let Some(start) = self.start {
            let floor = start
                .and_time(NaiveTime::MIN)
                .and_utc()
                .timestamp_millis();
            if ms < floor {
                return false;
            }
        }
        if let Some(end) = self.end {
            let Some(end_of_day) = NaiveTime::from_hms_milli_opt(23, 59, 59, 999) else {
                return false;
            };
            let ceiling = end.and_time(end_of_day).and_utc().timestamp_millis();
            if ms > ceiling {
                return false;
            }
        }
        true
    }
}

fn parse_bound(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, SvidError> {
    match value {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                SvidError::InvalidInput(format!(
                    "incorrect {field} format '{raw}', should be YYYY-MM-DD"
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_date_is_invalid_input() {
        let result = DateRange::parse(Some("not-a-date"), None);
        assert!(matches!(result, Err(SvidError::InvalidInput(_))));
    }

    #[test]
    fn test_year_month_inclusive_on_both_ends() {
        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
        assert!(range.contains_year_month("2020", "1"));
        assert!(range.contains_year_month("2020", "12"));
        assert!(!range.contains_year_month("2019", "12"));
        assert!(!range.contains_year_month("2021", "1"));
    }

    #[test]
    fn test_year_month_missing_date_excluded_only_when_bounded() {
        let bounded = DateRange::parse(Some("2020-01-01"), None).unwrap();
        assert!(!bounded.contains_year_month("", ""));
        let unbounded = DateRange::default();
        assert!(unbounded.contains_year_month("", ""));
    }

    #[test]
    fn test_epoch_ms_window_for_2020() {
        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
        // first and last millisecond of 2020 UTC
        assert!(range.contains_epoch_ms(1_577_836_800_000));
        assert!(range.contains_epoch_ms(1_609_459_199_999));
        assert!(!range.contains_epoch_ms(1_577_836_799_999));
        assert!(!range.contains_epoch_ms(1_609_459_200_000));
    }

    #[test]
    fn test_half_bounded_ranges() {
        let from = DateRange::parse(Some("2020-06-01"), None).unwrap();
        assert!(from.contains_year_month("2025", "3"));
        assert!(!from.contains_year_month("2020", "5"));
        let until = DateRange::parse(None, Some("2020-06-01")).unwrap();
        assert!(until.contains_year_month("2020", "6"));
        assert!(!until.contains_year_month("2020", "7"));
    }
}
