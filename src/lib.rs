//! Tally is a ledger server and offline client for a personal finance tracker.
//!
//! The server exposes a JSON API that keeps the ledger consistent: credit card
//! purchases are assigned to the statement they are paid in, multi-row mutations
//! such as bill payments are applied as a unit (undoing partial writes on
//! failure), journal entries are kept balanced and account balances are always
//! recomputed from the transactions they summarise.
//!
//! The [offline] module is the client half. It queues mutations made while
//! offline and replays them, in order and exactly once, when the client
//! reconnects.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde::{Deserialize, Serialize};
use time::Date;
use tokio::signal;

mod account;
mod app_state;
mod billing;
mod config;
mod database_id;
mod date_format;
mod db;
mod endpoints;
mod idempotency;
mod journal;
mod logging;
pub mod offline;
mod orchestrator;
mod period_lock;
mod routing;
mod timezone;
mod transaction;

pub use account::{
    Account, AccountEdit, AccountType, NewAccount, recalculate_balance, sum_completed,
};
pub use app_state::AppState;
pub use billing::{BillingCycle, InvoiceMonth, assign_invoice_month};
pub use config::{
    DEFAULT_IDEMPOTENCY_RETENTION_DAYS, DEFAULT_RECURRING_HORIZON_MONTHS, LedgerConfig,
    QueueConfig,
};
pub use database_id::{AccountId, CategoryId, DatabaseId, JournalEntryId, TransactionId};
pub use db::initialize as initialize_db;
pub use idempotency::IDEMPOTENCY_KEY_HEADER;
pub use journal::{EntryType, JournalEntry, UnbalancedTransaction, validate_journal};
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use orchestrator::{
    AccountImport, BillPayment, ImportedAccount, InstallmentInput, InstallmentSeries,
    PairedTransaction, RecurringSeries, TransferRequest,
};
pub use routing::build_router;
pub use timezone::{get_local_offset, today_in};
pub use transaction::{
    Recurrence, Transaction, TransactionBuilder, TransactionEdit, TransactionStatus,
    TransactionType,
};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The broad classes of [Error], which decide how a client should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before any write. Not retryable.
    Validation,
    /// Well formed input that breaks a rule of the ledger, e.g. a credit limit.
    /// Not retryable.
    Constraint,
    /// A multi-step operation failed part way and could not be fully undone.
    PartialWrite,
    /// Storage was temporarily unavailable. Retrying later may succeed.
    Transient,
    /// The requested resource does not exist.
    NotFound,
    /// An unexpected error, details are in the server logs.
    Internal,
}

impl ErrorKind {
    /// Whether an operation failing with this kind of error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A transaction amount of zero was given.
    #[error("the amount must not be zero")]
    ZeroAmount,

    /// An amount that must be positive, e.g. a transfer or bill payment, was
    /// zero or negative.
    #[error("the amount {0} must be greater than zero")]
    NonPositiveAmount(i64),

    /// The sign of the amount does not match the transaction type, e.g. an
    /// expense with a positive amount.
    #[error("a {transaction_type} must not have the amount {amount}")]
    SignMismatch {
        /// The declared transaction type.
        transaction_type: String,
        /// The signed amount that was given.
        amount: i64,
    },

    /// A closing or due day that is not a day of the month.
    #[error("{0} is not a valid day of the month")]
    InvalidBillingDay(u8),

    /// An invoice month label that is not of the form `YYYY-MM`.
    #[error("\"{0}\" is not a valid invoice month, expected YYYY-MM")]
    InvalidInvoiceMonth(String),

    /// A journal entry with a negative amount.
    #[error("the journal entry amount {0} must not be negative")]
    NegativeEntryAmount(i64),

    /// A credit limit or billing cycle was given for an account that is not a
    /// credit account.
    #[error("only credit accounts can have a credit limit or billing cycle")]
    CreditSettingsOnNonCreditAccount,

    /// A negative credit limit.
    #[error("the credit limit {0} must not be negative")]
    NegativeCreditLimit(i64),

    /// Money was moved from an account to itself.
    #[error("cannot move money from account {0} to itself")]
    SameAccount(AccountId),

    /// A bill payment was made to an account that is not a credit account.
    #[error("account {0} is not a credit account")]
    NotACreditAccount(AccountId),

    /// A bill payment was made from a credit account.
    #[error("a bill cannot be paid from the credit account {0}")]
    PaymentFromCreditAccount(AccountId),

    /// An installment series without any installments.
    #[error("an installment series needs at least one installment")]
    EmptyInstallmentSeries,

    /// An installment series with more installments than allowed.
    #[error("an installment series can have at most {max} installments, got {count}")]
    TooManyInstallments {
        /// The number of installments requested.
        count: usize,
        /// The largest number of installments allowed.
        max: u32,
    },

    /// An end date before the start date.
    #[error("the end date {end} is before the start date {start}")]
    InvalidDateRange {
        /// The start of the range.
        start: Date,
        /// The end of the range.
        end: Date,
    },

    /// An account name that is empty or only whitespace.
    #[error("account names cannot be empty")]
    EmptyAccountName,

    /// The specified account name already exists in the database.
    #[error("the account \"{0}\" already exists in the database")]
    DuplicateAccountName(String),

    /// The idempotency key was already used for a different operation.
    #[error("the idempotency key {key} was already used for {operation}")]
    IdempotencyKeyReused {
        /// The reused key.
        key: String,
        /// The operation the key was first used for.
        operation: String,
    },

    /// The expense would take a credit account past its credit limit.
    #[error(
        "the expense of {requested} exceeds the credit limit of {limit}, only {available} is available"
    )]
    CreditLimitExceeded {
        /// The account's credit limit.
        limit: i64,
        /// The amount the expense would use.
        requested: i64,
        /// The credit still available before the expense.
        available: i64,
    },

    /// The date falls inside a closed accounting period.
    #[error("{0} is inside a locked accounting period")]
    PeriodLocked(Date),

    /// A multi-step operation failed after some of its writes were committed
    /// and those writes could not all be undone.
    #[error(
        "{operation} failed and left the ledger in an inconsistent state \
        (transactions {committed:?} remain): {cause}"
    )]
    PartialWrite {
        /// The operation that failed.
        operation: String,
        /// The transactions that could not be removed.
        committed: Vec<TransactionId>,
        /// The error that triggered the rollback.
        cause: String,
    },

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// No account with the ID exists.
    #[error("account {0} does not exist")]
    AccountNotFound(AccountId),

    /// No transaction with the ID exists.
    #[error("transaction {0} does not exist")]
    TransactionNotFound(TransactionId),

    /// Tried to update an account that does not exist
    #[error("tried to update an account that is not in the database")]
    UpdateMissingAccount,

    /// Tried to delete an account that does not exist
    #[error("tried to delete an account that is not in the database")]
    DeleteMissingAccount,

    /// Tried to update a transaction that does not exist
    #[error("tried to update a transaction that is not in the database")]
    UpdateMissingTransaction,

    /// Tried to delete a transaction that does not exist
    #[error("tried to delete a transaction that is not in the database")]
    DeleteMissingTransaction,

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// SQLite reported the database as busy or locked.
    #[error("the database is temporarily unavailable: {0}")]
    StorageUnavailable(String),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// An error occurred while serializing a struct as JSON
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl Error {
    /// The class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ZeroAmount
            | Error::NonPositiveAmount(_)
            | Error::SignMismatch { .. }
            | Error::InvalidBillingDay(_)
            | Error::InvalidInvoiceMonth(_)
            | Error::NegativeEntryAmount(_)
            | Error::CreditSettingsOnNonCreditAccount
            | Error::NegativeCreditLimit(_)
            | Error::SameAccount(_)
            | Error::NotACreditAccount(_)
            | Error::PaymentFromCreditAccount(_)
            | Error::EmptyInstallmentSeries
            | Error::TooManyInstallments { .. }
            | Error::InvalidDateRange { .. }
            | Error::EmptyAccountName
            | Error::DuplicateAccountName(_)
            | Error::IdempotencyKeyReused { .. } => ErrorKind::Validation,
            Error::CreditLimitExceeded { .. } | Error::PeriodLocked(_) => ErrorKind::Constraint,
            Error::PartialWrite { .. } => ErrorKind::PartialWrite,
            Error::DatabaseLockError | Error::StorageUnavailable(_) => ErrorKind::Transient,
            Error::NotFound
            | Error::AccountNotFound(_)
            | Error::TransactionNotFound(_)
            | Error::UpdateMissingAccount
            | Error::DeleteMissingAccount
            | Error::UpdateMissingTransaction
            | Error::DeleteMissingTransaction => ErrorKind::NotFound,
            Error::InvalidTimezoneError(_)
            | Error::JSONSerializationError(_)
            | Error::SqlError(_) => ErrorKind::Internal,
        }
    }

    /// A machine readable code for clients to choose a message by.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ZeroAmount => "ZERO_AMOUNT",
            Error::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            Error::SignMismatch { .. } => "SIGN_MISMATCH",
            Error::InvalidBillingDay(_) => "INVALID_BILLING_DAY",
            Error::InvalidInvoiceMonth(_) => "INVALID_INVOICE_MONTH",
            Error::NegativeEntryAmount(_) => "NEGATIVE_ENTRY_AMOUNT",
            Error::CreditSettingsOnNonCreditAccount => "CREDIT_SETTINGS_ON_NON_CREDIT_ACCOUNT",
            Error::NegativeCreditLimit(_) => "NEGATIVE_CREDIT_LIMIT",
            Error::SameAccount(_) => "SAME_ACCOUNT",
            Error::NotACreditAccount(_) => "NOT_A_CREDIT_ACCOUNT",
            Error::PaymentFromCreditAccount(_) => "PAYMENT_FROM_CREDIT_ACCOUNT",
            Error::EmptyInstallmentSeries => "EMPTY_INSTALLMENT_SERIES",
            Error::TooManyInstallments { .. } => "TOO_MANY_INSTALLMENTS",
            Error::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Error::EmptyAccountName => "EMPTY_ACCOUNT_NAME",
            Error::DuplicateAccountName(_) => "DUPLICATE_ACCOUNT_NAME",
            Error::IdempotencyKeyReused { .. } => "IDEMPOTENCY_KEY_REUSED",
            Error::CreditLimitExceeded { .. } => "CREDIT_LIMIT_EXCEEDED",
            Error::PeriodLocked(_) => "PERIOD_LOCKED",
            Error::PartialWrite { .. } => "PARTIAL_WRITE",
            Error::NotFound => "NOT_FOUND",
            Error::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Error::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Error::UpdateMissingAccount => "UPDATE_MISSING_ACCOUNT",
            Error::DeleteMissingAccount => "DELETE_MISSING_ACCOUNT",
            Error::UpdateMissingTransaction => "UPDATE_MISSING_TRANSACTION",
            Error::DeleteMissingTransaction => "DELETE_MISSING_TRANSACTION",
            Error::DatabaseLockError => "DATABASE_LOCKED",
            Error::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Error::InvalidTimezoneError(_) => "INVALID_TIMEZONE",
            Error::JSONSerializationError(_) => "SERIALIZATION_ERROR",
            Error::SqlError(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured details for errors a client renders a precise message for.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::CreditLimitExceeded {
                limit,
                requested,
                available,
            } => Some(serde_json::json!({
                "limit": limit,
                "requested": requested,
                "available": available,
            })),
            Error::PeriodLocked(date) => Some(serde_json::json!({ "date": date.to_string() })),
            Error::PartialWrite {
                operation,
                committed,
                ..
            } => Some(serde_json::json!({
                "operation": operation,
                "committed": committed,
                "inconsistent_state": true,
            })),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Constraint => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::PartialWrite | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            rusqlite::Error::SqliteFailure(sql_error, ref description)
                if matches!(
                    sql_error.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Error::StorageUnavailable(description.clone().unwrap_or_default())
            }
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

/// The JSON body sent for every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always `false`.
    pub success: bool,
    /// A description of what went wrong.
    pub error: String,
    /// The same text as `error`, for clients of the recurring series endpoint.
    pub error_message: String,
    /// A machine readable error code, see [Error::code].
    pub code: String,
    /// The class of error.
    pub kind: ErrorKind,
    /// Structured details, e.g. the credit limit and requested amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();

        let message = match kind {
            // Internal details are only meant for the server logs.
            ErrorKind::Internal => {
                tracing::error!("An unexpected error occurred: {}", self);
                "An unexpected error occurred, check the server logs for more details.".to_owned()
            }
            _ => self.to_string(),
        };

        let body = ErrorBody {
            success: false,
            error: message.clone(),
            error_message: message,
            code: self.code().to_owned(),
            kind,
            details: self.details(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
