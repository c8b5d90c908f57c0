//! Closed accounting periods.
//!
//! Transactions cannot be created, edited or deleted on a date inside a locked
//! period, and recurring series skip the locked dates.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    AppState, Error,
    date_format::iso_date,
    idempotency::{idempotency_key, idempotent_atomic},
};

/// A closed date range, including both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPeriod {
    /// The first locked date.
    #[serde(with = "iso_date")]
    pub start_date: Date,
    /// The last locked date.
    #[serde(with = "iso_date")]
    pub end_date: Date,
}

impl LockedPeriod {
    /// Whether `date` falls inside this period.
    pub fn contains(&self, date: Date) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Reports which dates fall inside closed accounting periods.
pub trait PeriodLockChecker {
    /// Whether `date` is inside a locked period.
    ///
    /// # Errors
    /// Returns an error if the lock state could not be read.
    fn is_locked(&self, date: Date) -> Result<bool, Error>;

    /// The locked periods that overlap the dates from `start` to `end` inclusive.
    ///
    /// # Errors
    /// Returns an error if the lock state could not be read.
    fn locked_periods_between(&self, start: Date, end: Date) -> Result<Vec<LockedPeriod>, Error>;
}

impl PeriodLockChecker for Connection {
    fn is_locked(&self, date: Date) -> Result<bool, Error> {
        self.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM locked_period WHERE start_date <= ?1 AND end_date >= ?1
            )",
            params![date],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn locked_periods_between(&self, start: Date, end: Date) -> Result<Vec<LockedPeriod>, Error> {
        self.prepare(
            "SELECT start_date, end_date FROM locked_period
             WHERE start_date <= ?2 AND end_date >= ?1
             ORDER BY start_date ASC",
        )?
        .query_map(params![start, end], |row| {
            Ok(LockedPeriod {
                start_date: row.get(0)?,
                end_date: row.get(1)?,
            })
        })?
        .map(|maybe_period| maybe_period.map_err(|error| error.into()))
        .collect()
    }
}

/// Create the locked period table in the database.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_locked_period_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS locked_period (
            id INTEGER PRIMARY KEY,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
        (),
    )?;

    Ok(())
}

/// Fail with [Error::PeriodLocked] if `date` is inside a locked period.
///
/// # Errors
/// Returns [Error::PeriodLocked] for locked dates, or an SQL error.
pub fn check_period_open(date: Date, checker: &impl PeriodLockChecker) -> Result<(), Error> {
    if checker.is_locked(date)? {
        return Err(Error::PeriodLocked(date));
    }

    Ok(())
}

/// Close the accounting period `period`.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidDateRange] if the period ends before it starts,
/// - or [Error::SqlError] if there is an SQL error.
pub fn lock_period(period: &LockedPeriod, connection: &Connection) -> Result<(), Error> {
    if period.end_date < period.start_date {
        return Err(Error::InvalidDateRange {
            start: period.start_date,
            end: period.end_date,
        });
    }

    connection.execute(
        "INSERT INTO locked_period (start_date, end_date) VALUES (?1, ?2)",
        params![period.start_date, period.end_date],
    )?;

    tracing::info!(
        "Locked the period {} to {}",
        period.start_date,
        period.end_date
    );

    Ok(())
}

/// The state needed to lock an accounting period.
#[derive(Debug, Clone)]
pub struct LockPeriodState {
    /// The database connection for managing locked periods.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for LockPeriodState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The response to locking a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockPeriodResponse {
    /// Always `true`.
    pub success: bool,
    /// The period that was locked.
    pub period: LockedPeriod,
}

/// A route handler for locking an accounting period.
pub async fn lock_period_endpoint(
    State(state): State<LockPeriodState>,
    headers: HeaderMap,
    Json(period): Json<LockedPeriod>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match idempotent_atomic(key.as_deref(), "lock_period", &connection, |connection| {
        lock_period(&period, connection)?;
        Ok(LockPeriodResponse {
            success: true,
            period,
        })
    }) {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            tracing::error!("Could not lock period {period:?}: {error}");
            error.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{Error, db::initialize};

    use super::{LockedPeriod, PeriodLockChecker, check_period_open, lock_period};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn january() -> LockedPeriod {
        LockedPeriod {
            start_date: date!(2025 - 01 - 01),
            end_date: date!(2025 - 01 - 31),
        }
    }

    #[test]
    fn dates_inside_period_are_locked() {
        let conn = get_test_connection();
        lock_period(&january(), &conn).unwrap();

        assert_eq!(conn.is_locked(date!(2025 - 01 - 01)), Ok(true));
        assert_eq!(conn.is_locked(date!(2025 - 01 - 31)), Ok(true));
        assert_eq!(conn.is_locked(date!(2024 - 12 - 31)), Ok(false));
        assert_eq!(conn.is_locked(date!(2025 - 02 - 01)), Ok(false));
    }

    #[test]
    fn check_names_locked_date() {
        let conn = get_test_connection();
        lock_period(&january(), &conn).unwrap();

        assert_eq!(
            check_period_open(date!(2025 - 01 - 15), &conn),
            Err(Error::PeriodLocked(date!(2025 - 01 - 15)))
        );
    }

    #[test]
    fn range_query_returns_overlapping_periods() {
        let conn = get_test_connection();
        lock_period(&january(), &conn).unwrap();
        let march = LockedPeriod {
            start_date: date!(2025 - 03 - 01),
            end_date: date!(2025 - 03 - 31),
        };
        lock_period(&march, &conn).unwrap();

        let periods = conn
            .locked_periods_between(date!(2025 - 01 - 20), date!(2025 - 02 - 28))
            .unwrap();

        assert_eq!(periods, vec![january()]);
    }

    #[test]
    fn lock_fails_on_reversed_range() {
        let conn = get_test_connection();

        let result = lock_period(
            &LockedPeriod {
                start_date: date!(2025 - 02 - 01),
                end_date: date!(2025 - 01 - 01),
            },
            &conn,
        );

        assert_eq!(
            result,
            Err(Error::InvalidDateRange {
                start: date!(2025 - 02 - 01),
                end: date!(2025 - 01 - 01),
            })
        );
    }
}
