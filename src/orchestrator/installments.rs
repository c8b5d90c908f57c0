//! Installment series: a purchase split into several dated payments.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    AppState, Error,
    account::recalculate_balance,
    database_id::{AccountId, CategoryId, TransactionId},
    date_format::iso_date,
    idempotency::{idempotency_key, idempotent},
    orchestrator::UndoStep,
    transaction::{
        Transaction, TransactionStatus, TransactionType, create_transaction,
        set_installment_position,
    },
};

/// The largest number of installments in one series.
pub const MAX_INSTALLMENTS: u32 = 1_000;

/// One payment of an installment series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentInput {
    /// What the payment is for, e.g. "Laptop 1/3".
    #[serde(default)]
    pub description: String,
    /// The signed amount in minor units.
    pub amount: i64,
    /// When the payment is made.
    #[serde(with = "iso_date")]
    pub date: Date,
}

/// The request body for creating an installment series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSeries {
    /// The account every installment belongs to.
    pub account_id: AccountId,
    /// Whether the installments are income or expenses.
    pub transaction_type: TransactionType,
    /// Whether the installments have settled.
    #[serde(default)]
    pub status: TransactionStatus,
    /// The spending or income category of every installment.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The payments in order.
    pub installments: Vec<InstallmentInput>,
}

/// The response to creating an installment series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSeriesResponse {
    /// Always true, mirrors the `success: false` of error bodies.
    pub success: bool,
    /// The first installment, which every installment points at.
    pub parent_id: TransactionId,
    /// The installments in order.
    pub transactions: Vec<Transaction>,
    /// The account balance after the series was created.
    pub balance: i64,
}

/// Create one transaction per installment and group them under the first.
///
/// Every installment goes through [create_transaction], so each is checked
/// for sign, locked periods and credit limits. If any installment fails, the
/// installments already created are deleted.
///
/// # Errors
/// This function will return a:
/// - [Error::EmptyInstallmentSeries] if there are no installments,
/// - or [Error::TooManyInstallments] if there are more than [MAX_INSTALLMENTS],
/// - or the error of the failed installment,
/// - or [Error::PartialWrite] if the created installments could not be deleted.
pub fn create_installments(
    series: &InstallmentSeries,
    key: Option<&str>,
    connection: &Connection,
) -> Result<InstallmentSeriesResponse, Error> {
    idempotent(key, "create_installments", connection, |compensation| {
        if series.installments.is_empty() {
            return Err(Error::EmptyInstallmentSeries);
        }

        let count = u32::try_from(series.installments.len())
            .ok()
            .filter(|&count| count <= MAX_INSTALLMENTS)
            .ok_or(Error::TooManyInstallments {
                count: series.installments.len(),
                max: MAX_INSTALLMENTS,
            })?;
        let mut transactions = Vec::with_capacity(series.installments.len());

        for (index, installment) in series.installments.iter().enumerate() {
            let builder = Transaction::build(
                series.account_id,
                installment.amount,
                installment.date,
                series.transaction_type,
            )
            .description(&installment.description)
            .status(series.status)
            .category_id(series.category_id);

            let transaction = compensation.check(
                &format!("creating installment {} of {count}", index + 1),
                create_transaction(&builder, connection),
            )?;
            compensation.record(UndoStep::DeleteTransaction(transaction.id));
            compensation.touch(series.account_id);
            transactions.push(transaction);
        }

        let parent_id = transactions[0].id;

        for (current, transaction) in (1..=count).zip(transactions.iter_mut()) {
            compensation.check(
                "numbering the installments",
                set_installment_position(transaction.id, parent_id, count, current, connection),
            )?;
            transaction.parent_transaction_id = Some(parent_id);
            transaction.installments = Some(count);
            transaction.current_installment = Some(current);
        }

        let balance = compensation.check(
            "recalculating the balance",
            recalculate_balance(series.account_id, connection),
        )?;

        Ok(InstallmentSeriesResponse {
            success: true,
            parent_id,
            transactions,
            balance,
        })
    })
}

/// The state needed to create installment series.
#[derive(Debug, Clone)]
pub struct InstallmentState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for InstallmentState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for creating an installment series.
pub async fn create_installments_endpoint(
    State(state): State<InstallmentState>,
    headers: HeaderMap,
    Json(series): Json<InstallmentSeries>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match create_installments(&series, key.as_deref(), &connection) {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => {
            tracing::error!(
                "Could not create {} installments on account {}: {error}",
                series.installments.len(),
                series.account_id
            );
            error.into_response()
        }
    }
}
