//! Field predicates. String comparisons are case-insensitive; date
//! comparisons count whole days elapsed between the received time and a
//! caller-supplied `now`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Months are approximated as 30 days, not calendar months.
pub const DAYS_PER_MONTH: i64 = 30;

pub const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPredicate {
    Contains,
    DoesNotContain,
    Equals,
    DoesNotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePredicate {
    LessThanDays,
    GreaterThanDays,
    LessThanMonths,
    GreaterThanMonths,
}

impl StringPredicate {
    pub fn as_str(self) -> &'static str {
        match self {
            StringPredicate::Contains => "contains",
            StringPredicate::DoesNotContain => "does_not_contain",
            StringPredicate::Equals => "equals",
            StringPredicate::DoesNotEqual => "does_not_equal",
        }
    }

    pub fn apply(self, field: &str, value: &str) -> bool {
        match self {
            StringPredicate::Contains => contains(field, value),
            StringPredicate::DoesNotContain => !contains(field, value),
            StringPredicate::Equals => equals(field, value),
            StringPredicate::DoesNotEqual => !equals(field, value),
        }
    }
}

impl DatePredicate {
    pub fn as_str(self) -> &'static str {
        match self {
            DatePredicate::LessThanDays => "less_than_days",
            DatePredicate::GreaterThanDays => "greater_than_days",
            DatePredicate::LessThanMonths => "less_than_months",
            DatePredicate::GreaterThanMonths => "greater_than_months",
        }
    }

    /// Threshold in days for an amount expressed in this predicate's unit.
    pub fn threshold_days(self, amount: i64) -> i64 {
        match self {
            DatePredicate::LessThanDays | DatePredicate::GreaterThanDays => amount,
            DatePredicate::LessThanMonths | DatePredicate::GreaterThanMonths => {
                amount.saturating_mul(DAYS_PER_MONTH)
            }
        }
    }

    pub fn is_less_than(self) -> bool {
        matches!(
            self,
            DatePredicate::LessThanDays | DatePredicate::LessThanMonths
        )
    }

    pub fn apply(self, received: DateTime<Utc>, amount: i64, now: DateTime<Utc>) -> bool {
        let elapsed = days_since(received, now);
        let threshold = self.threshold_days(amount);
        if self.is_less_than() {
            elapsed < threshold
        } else {
            elapsed > threshold
        }
    }
}

impl FromStr for StringPredicate {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(StringPredicate::Contains),
            "does_not_contain" => Ok(StringPredicate::DoesNotContain),
            "equals" => Ok(StringPredicate::Equals),
            "does_not_equal" => Ok(StringPredicate::DoesNotEqual),
            _ => Err(()),
        }
    }
}

impl FromStr for DatePredicate {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "less_than_days" => Ok(DatePredicate::LessThanDays),
            "greater_than_days" => Ok(DatePredicate::GreaterThanDays),
            "less_than_months" => Ok(DatePredicate::LessThanMonths),
            "greater_than_months" => Ok(DatePredicate::GreaterThanMonths),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StringPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DatePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn contains(field: &str, value: &str) -> bool {
    field.to_lowercase().contains(&value.to_lowercase())
}

pub fn equals(field: &str, value: &str) -> bool {
    field.to_lowercase() == value.to_lowercase()
}

/// Whole days from `received` to `now`, floored. Messages dated in the
/// future give negative counts.
pub fn days_since(received: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - received).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_string_predicates_ignore_case() {
        assert!(StringPredicate::Contains.apply("Boss@Co.com", "boss@co"));
        assert!(StringPredicate::Equals.apply("Test", "test"));
        assert!(!StringPredicate::DoesNotEqual.apply("TEST", "test"));
        assert!(StringPredicate::DoesNotContain.apply("user@example.com", "test"));
        assert!(!StringPredicate::DoesNotContain.apply("Weekly NEWSLETTER", "newsletter"));
    }

    #[test]
    fn test_empty_value_is_contained_everywhere() {
        assert!(contains("anything", ""));
        assert!(contains("", ""));
        assert!(!equals("anything", ""));
    }

    #[test]
    fn test_less_than_days_is_strict() {
        let received = now() - Duration::days(5);
        assert!(!DatePredicate::LessThanDays.apply(received, 5, now()));
        assert!(DatePredicate::LessThanDays.apply(received, 6, now()));
    }

    #[test]
    fn test_greater_than_days_is_strict() {
        let received = now() - Duration::days(5);
        assert!(!DatePredicate::GreaterThanDays.apply(received, 5, now()));
        assert!(DatePredicate::GreaterThanDays.apply(received, 4, now()));
    }

    #[test]
    fn test_partial_days_are_floored() {
        let received = now() - Duration::days(5) - Duration::hours(23);
        assert_eq!(days_since(received, now()), 5);
        assert!(!DatePredicate::GreaterThanDays.apply(received, 5, now()));
    }

    #[test]
    fn test_future_dates_count_negative() {
        let received = now() + Duration::hours(1);
        assert_eq!(days_since(received, now()), -1);
        assert!(DatePredicate::LessThanDays.apply(received, 0, now()));
    }

    #[test]
    fn test_months_are_thirty_days() {
        let received = now() - Duration::days(61);
        assert!(DatePredicate::GreaterThanMonths.apply(received, 2, now()));
        assert!(!DatePredicate::LessThanMonths.apply(received, 2, now()));
        assert!(DatePredicate::LessThanMonths.apply(now() - Duration::days(59), 2, now()));
    }

    #[test]
    fn test_predicate_names_round_trip() {
        for name in ["contains", "does_not_contain", "equals", "does_not_equal"] {
            assert_eq!(name.parse::<StringPredicate>().unwrap().as_str(), name);
        }
        assert!("less_than_days".parse::<StringPredicate>().is_err());
        assert!("contains".parse::<DatePredicate>().is_err());
    }
}
