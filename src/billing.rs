//! Assigns credit card transactions to the billing cycle they are paid in.
//!
//! A card's statement period runs from the day after one month's closing day to
//! the next month's closing day (inclusive). The statement is due on the due day
//! of the month after it closes, and the *invoice month* is the month that due
//! date falls in.

use std::{fmt::Display, str::FromStr};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, Month, OffsetDateTime, Time, macros::time, util::is_leap_year};

use crate::Error;

/// The time of day used to interpret calendar dates.
///
/// Pinning dates to midday keeps a date on the same calendar day for every UTC
/// offset between -12:00 and +12:00.
pub const MIDDAY: Time = time!(12:00);

/// The closing and due days of a credit card statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    /// The day of the month the statement closes on, 1-31.
    pub closing_day: u8,
    /// The day of the month after closing that the statement is due, 1-31.
    pub due_day: u8,
}

impl BillingCycle {
    /// Create a billing cycle, checking both days are valid days of a month.
    ///
    /// # Errors
    /// Returns [Error::InvalidBillingDay] if either day is outside 1-31.
    pub fn new(closing_day: u8, due_day: u8) -> Result<Self, Error> {
        let cycle = Self {
            closing_day,
            due_day,
        };
        cycle.validate()?;

        Ok(cycle)
    }

    /// Check both days are valid days of a month.
    ///
    /// # Errors
    /// Returns [Error::InvalidBillingDay] if either day is outside 1-31.
    pub fn validate(&self) -> Result<(), Error> {
        for day in [self.closing_day, self.due_day] {
            if !(1..=31).contains(&day) {
                return Err(Error::InvalidBillingDay(day));
            }
        }

        Ok(())
    }

    /// The invoice month for a transaction made on `date`.
    pub fn invoice_month(&self, date: Date) -> InvoiceMonth {
        assign_invoice_month(date, self.closing_day, self.due_day)
    }
}

/// A calendar month label in the form `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvoiceMonth {
    year: i32,
    month: Month,
}

impl InvoiceMonth {
    /// Create an invoice month label.
    pub fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    /// The calendar year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// The calendar month.
    pub fn month(&self) -> Month {
        self.month
    }
}

impl Display for InvoiceMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, u8::from(self.month))
    }
}

impl FromStr for InvoiceMonth {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidInvoiceMonth(text.to_owned());

        let (year, month) = text.split_once('-').ok_or_else(invalid)?;

        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        let month = Month::try_from(month).map_err(|_| invalid())?;

        Ok(Self { year, month })
    }
}

impl Serialize for InvoiceMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InvoiceMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;

        text.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for InvoiceMonth {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for InvoiceMonth {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

/// Map a transaction date to the invoice month of the card statement it lands on.
///
/// Days beyond the end of a month clamp to that month's last day, e.g. a closing
/// day of 31 closes on the 28th or 29th in February.
pub fn assign_invoice_month(transaction_date: Date, closing_day: u8, due_day: u8) -> InvoiceMonth {
    let reference = transaction_date.with_time(MIDDAY);
    let (year, month) = (reference.year(), reference.month());

    let closing_month = if reference.day() <= clamp_day(year, month, closing_day) {
        (year, month)
    } else {
        next_month(year, month)
    };

    let (due_year, due_month) = next_month(closing_month.0, closing_month.1);

    InvoiceMonth::new(due_year, due_month)
}

/// The date the statement containing `transaction_date` is due.
///
/// Returns `None` only if the due date is outside the range `time` supports.
pub fn due_date(transaction_date: Date, cycle: BillingCycle) -> Option<Date> {
    let invoice_month = cycle.invoice_month(transaction_date);
    let day = clamp_day(invoice_month.year, invoice_month.month, cycle.due_day);

    Date::from_calendar_date(invoice_month.year, invoice_month.month, day).ok()
}

/// The invoice month for a timestamp, using the calendar date in the timestamp's
/// own offset.
///
/// A purchase made at local midnight stays on its local date rather than the
/// previous UTC day.
pub fn assign_invoice_month_at(instant: OffsetDateTime, cycle: BillingCycle) -> InvoiceMonth {
    cycle.invoice_month(calendar_date(instant))
}

/// The calendar date of `instant` in its own offset.
pub fn calendar_date(instant: OffsetDateTime) -> Date {
    instant.date()
}

/// Pin the local calendar date of `instant` to midday UTC.
pub fn normalize_to_midday_utc(instant: OffsetDateTime) -> OffsetDateTime {
    calendar_date(instant).with_time(MIDDAY).assume_utc()
}

/// The number of days in `month` of `year`.
pub(crate) fn days_in_month(year: i32, month: Month) -> u8 {
    match month {
        Month::February if is_leap_year(year) => 29,
        Month::February => 28,
        Month::April | Month::June | Month::September | Month::November => 30,
        _ => 31,
    }
}

/// Add `months` calendar months to `anchor`, clamping the day to the target month.
///
/// Returns `None` if the result is outside the range `time` supports.
pub(crate) fn add_months(anchor: Date, months: u32) -> Option<Date> {
    let zero_based = i64::from(anchor.year()) * 12 + (i64::from(u8::from(anchor.month())) - 1);
    let target = zero_based + i64::from(months);

    let year = i32::try_from(target.div_euclid(12)).ok()?;
    let month = Month::try_from((target.rem_euclid(12) + 1) as u8).ok()?;
    let day = clamp_day(year, month, anchor.day());

    Date::from_calendar_date(year, month, day).ok()
}

fn clamp_day(year: i32, month: Month, day: u8) -> u8 {
    day.min(days_in_month(year, month))
}

fn next_month(year: i32, month: Month) -> (i32, Month) {
    match month {
        Month::December => (year + 1, Month::January),
        month => (year, month.next()),
    }
}

#[cfg(test)]
mod assign_invoice_month_tests {
    use time::{Month, UtcOffset, macros::date};

    use super::{
        BillingCycle, InvoiceMonth, assign_invoice_month, assign_invoice_month_at,
        calendar_date, due_date, normalize_to_midday_utc,
    };

    #[test]
    fn purchase_after_closing_day_is_due_two_months_later() {
        let got = assign_invoice_month(date!(2025 - 03 - 25), 20, 10);

        assert_eq!(got, InvoiceMonth::new(2025, Month::May));
    }

    #[test]
    fn purchase_before_closing_day_is_due_next_month() {
        let got = assign_invoice_month(date!(2025 - 03 - 15), 20, 10);

        assert_eq!(got, InvoiceMonth::new(2025, Month::April));
    }

    #[test]
    fn purchase_on_closing_day_belongs_to_closing_cycle() {
        let got = assign_invoice_month(date!(2025 - 03 - 20), 20, 10);

        assert_eq!(got, InvoiceMonth::new(2025, Month::April));
    }

    #[test]
    fn closing_day_past_end_of_february_clamps_to_last_day() {
        let cycle = BillingCycle::new(31, 10).unwrap();

        assert_eq!(
            cycle.invoice_month(date!(2025 - 02 - 28)),
            InvoiceMonth::new(2025, Month::March)
        );
        assert_eq!(
            cycle.invoice_month(date!(2024 - 02 - 29)),
            InvoiceMonth::new(2024, Month::March)
        );
    }

    #[test]
    fn closing_day_30_with_purchase_on_31st_rolls_into_next_cycle() {
        let got = assign_invoice_month(date!(2025 - 01 - 31), 30, 5);

        assert_eq!(got, InvoiceMonth::new(2025, Month::March));
    }

    #[test]
    fn late_december_purchase_rolls_over_the_year() {
        assert_eq!(
            assign_invoice_month(date!(2025 - 12 - 25), 20, 10),
            InvoiceMonth::new(2026, Month::February)
        );
        assert_eq!(
            assign_invoice_month(date!(2025 - 11 - 25), 20, 10),
            InvoiceMonth::new(2026, Month::January)
        );
    }

    #[test]
    fn due_day_clamps_to_end_of_due_month() {
        let cycle = BillingCycle::new(15, 31).unwrap();

        assert_eq!(due_date(date!(2025 - 01 - 10), cycle), Some(date!(2025 - 02 - 28)));
        assert_eq!(
            cycle.invoice_month(date!(2025 - 01 - 10)),
            InvoiceMonth::new(2025, Month::February)
        );
    }

    #[test]
    fn invalid_days_are_rejected() {
        assert!(BillingCycle::new(0, 10).is_err());
        assert!(BillingCycle::new(10, 32).is_err());
        assert!(BillingCycle::new(31, 31).is_ok());
    }

    #[test]
    fn local_midnight_and_midday_utc_agree_for_every_day_and_offset() {
        let cycles = [(1, 1), (5, 15), (20, 10), (28, 28), (31, 31)];
        let offsets = (-12..=14).map(|hours| UtcOffset::from_hms(hours, 0, 0).unwrap());

        for offset in offsets {
            let mut date = date!(2024 - 01 - 01);
            while date.year() == 2024 {
                let local_midnight = date.midnight().assume_offset(offset);
                let normalized = normalize_to_midday_utc(local_midnight);

                assert_eq!(calendar_date(local_midnight), date);
                assert_eq!(calendar_date(normalized), date);

                for (closing_day, due_day) in cycles {
                    let cycle = BillingCycle::new(closing_day, due_day).unwrap();
                    let want = cycle.invoice_month(date);

                    assert_eq!(assign_invoice_month_at(local_midnight, cycle), want);
                    assert_eq!(assign_invoice_month_at(normalized, cycle), want);
                    assert_eq!(assign_invoice_month(date, closing_day, due_day), want);
                }

                date = date.next_day().unwrap();
            }
        }
    }
}
