//! Recurring series: a transaction that repeats daily, weekly, monthly or yearly.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::{
    AppState, Error,
    account::{get_account, recalculate_balance},
    billing::add_months,
    config::LedgerConfig,
    database_id::{AccountId, CategoryId, TransactionId},
    date_format::iso_date,
    idempotency::{idempotency_key, idempotent},
    orchestrator::UndoStep,
    period_lock::{LockedPeriod, PeriodLockChecker},
    timezone::today_in,
    transaction::{
        Recurrence, Transaction, TransactionStatus, TransactionType, create_transaction,
        insert_transaction,
    },
};

/// The request body for generating a recurring series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSeries {
    /// The account every occurrence belongs to.
    pub account_id: AccountId,
    /// The signed amount of every occurrence in minor units.
    pub amount: i64,
    /// The spending or income category of every occurrence.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The date of the first occurrence.
    #[serde(with = "iso_date")]
    pub date: Date,
    /// What the transaction is for.
    #[serde(default)]
    pub description: String,
    /// How often the transaction repeats.
    pub recurrence_type: Recurrence,
    /// The last date an occurrence may fall on.
    #[serde(default, with = "iso_date::option")]
    pub recurrence_end_date: Option<Date>,
    /// Whether occurrences up to today have settled.
    #[serde(default)]
    pub status: TransactionStatus,
    /// Whether the transaction is income or an expense.
    pub transaction_type: TransactionType,
}

/// The response to generating a recurring series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSeriesResponse {
    /// Always true, mirrors the `success: false` of error bodies.
    pub success: bool,
    /// The number of occurrences generated after the first one.
    pub created_count: usize,
    /// The first occurrence, which every later occurrence points at.
    pub parent_id: TransactionId,
}

/// The date of the `n`th occurrence after `start`, or `None` if it is out of range.
///
/// Monthly and yearly series keep the day of month of `start`, clamped to
/// shorter months, e.g. a series starting on January 31st falls on February
/// 28th and then March 31st.
pub fn occurrence_date(start: Date, recurrence: Recurrence, n: u32) -> Option<Date> {
    match recurrence {
        Recurrence::Daily => start.checked_add(Duration::days(n.into())),
        Recurrence::Weekly => start.checked_add(Duration::weeks(n.into())),
        Recurrence::Monthly => add_months(start, n),
        Recurrence::Yearly => add_months(start, n.checked_mul(12)?),
    }
}

/// The dates after `start` up to and including `last` on which the series
/// falls, excluding dates inside `locked_periods`.
fn occurrence_dates(
    start: Date,
    recurrence: Recurrence,
    last: Date,
    locked_periods: &[LockedPeriod],
) -> Vec<Date> {
    (1..)
        .map_while(|n| occurrence_date(start, recurrence, n))
        .take_while(|date| *date <= last)
        .filter(|date| !locked_periods.iter().any(|period| period.contains(*date)))
        .collect()
}

/// Create the first occurrence of `series` and every later occurrence up to
/// its end date or `horizon_months` after its start, whichever comes first.
///
/// Occurrences inside locked periods are skipped. Occurrences dated after
/// `today` are pending, the rest take the status of the series.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidDateRange] if the end date is before the start date,
/// - or the errors of [create_transaction] for the first occurrence,
/// - or [Error::PartialWrite] if a later step failed and the created
///   occurrences could not be deleted.
pub fn generate_recurring(
    series: &RecurringSeries,
    today: Date,
    horizon_months: u32,
    key: Option<&str>,
    connection: &Connection,
) -> Result<RecurringSeriesResponse, Error> {
    idempotent(key, "generate_recurring", connection, |compensation| {
        if let Some(end) = series.recurrence_end_date
            && end < series.date
        {
            return Err(Error::InvalidDateRange {
                start: series.date,
                end,
            });
        }

        let account = get_account(series.account_id, connection)?;
        let horizon = add_months(series.date, horizon_months).unwrap_or(Date::MAX);
        let last = series
            .recurrence_end_date
            .map_or(horizon, |end| end.min(horizon));

        let parent = Transaction::build(
            series.account_id,
            series.amount,
            series.date,
            series.transaction_type,
        )
        .description(&series.description)
        .status(status_on(series.date, series.status, today))
        .category_id(series.category_id)
        .recurrence(Some(series.recurrence_type));

        let parent = compensation.check(
            "creating the first occurrence",
            create_transaction(&parent, connection),
        )?;
        compensation.record(UndoStep::DeleteTransaction(parent.id));
        compensation.touch(series.account_id);

        let locked_periods = compensation.check(
            "reading locked periods",
            connection.locked_periods_between(series.date, last),
        )?;
        let dates = occurrence_dates(series.date, series.recurrence_type, last, &locked_periods);

        for date in &dates {
            let child = Transaction::build(
                series.account_id,
                series.amount,
                *date,
                series.transaction_type,
            )
            .description(&series.description)
            .status(status_on(*date, series.status, today))
            .category_id(series.category_id)
            .parent_transaction_id(Some(parent.id));

            let child = compensation.check(
                &format!("creating the occurrence on {date}"),
                insert_transaction(&child, &account, connection),
            )?;
            compensation.record(UndoStep::DeleteTransaction(child.id));
        }

        compensation.check(
            "recalculating the balance",
            recalculate_balance(series.account_id, connection),
        )?;

        Ok(RecurringSeriesResponse {
            success: true,
            created_count: dates.len(),
            parent_id: parent.id,
        })
    })
}

fn status_on(date: Date, status: TransactionStatus, today: Date) -> TransactionStatus {
    if date > today {
        TransactionStatus::Pending
    } else {
        status
    }
}

/// The state needed to generate recurring series.
#[derive(Debug, Clone)]
pub struct RecurringState {
    /// The local timezone and recurring horizon.
    pub config: LedgerConfig,
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for RecurringState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            config: state.config.clone(),
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for generating a recurring series.
pub async fn generate_recurring_endpoint(
    State(state): State<RecurringState>,
    headers: HeaderMap,
    Json(series): Json<RecurringSeries>,
) -> Response {
    let today = match today_in(&state.config.local_timezone) {
        Ok(today) => today,
        Err(error) => return error.into_response(),
    };

    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match generate_recurring(
        &series,
        today,
        state.config.recurring_horizon_months,
        key.as_deref(),
        &connection,
    ) {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => {
            tracing::error!(
                "Could not generate the recurring series on account {}: {error}",
                series.account_id
            );
            error.into_response()
        }
    }
}
