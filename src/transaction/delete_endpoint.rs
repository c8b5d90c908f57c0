//! Defines the endpoint for deleting a transaction.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    account::{AccountBalance, recalculate_balances},
    database_id::TransactionId,
    idempotency::{idempotency_key, idempotent_atomic},
    period_lock::check_period_open,
    transaction::{delete_transaction_row, get_transaction, promote_series_successor},
};

/// The state needed to delete a transaction.
#[derive(Debug, Clone)]
pub struct DeleteTransactionState {
    /// The database connection for managing transactions.
    db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for DeleteTransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The response to deleting a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTransactionResponse {
    /// The deleted transaction followed by its partner, if it had one.
    pub deleted_ids: Vec<TransactionId>,
    /// The recalculated balances of the affected accounts.
    pub balances: Vec<AccountBalance>,
}

/// Delete the transaction `id`, and its partner if it is one half of a paired
/// transaction, then recalculate the affected balances.
///
/// Deleting the parent of an installment or recurring series hands the
/// series to its earliest remaining member.
///
/// # Errors
/// This function will return a:
/// - [Error::DeleteMissingTransaction] if `id` does not refer to a transaction,
/// - or [Error::PeriodLocked] if either transaction is in a locked period,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_transaction(
    id: TransactionId,
    connection: &Connection,
) -> Result<DeleteTransactionResponse, Error> {
    let transaction = get_transaction(id, connection).map_err(|error| match error {
        Error::TransactionNotFound(_) => Error::DeleteMissingTransaction,
        error => error,
    })?;
    check_period_open(transaction.date, connection)?;

    let mut deleted_ids = vec![transaction.id];
    let mut touched_accounts = vec![transaction.account_id];

    if let Some(linked_id) = transaction.linked_transaction_id {
        match get_transaction(linked_id, connection) {
            Ok(partner) => {
                check_period_open(partner.date, connection)?;
                promote_series_successor(&partner, connection)?;
                delete_transaction_row(partner.id, connection)?;
                deleted_ids.push(partner.id);
                touched_accounts.push(partner.account_id);
            }
            Err(Error::TransactionNotFound(_)) => {}
            Err(error) => return Err(error),
        }
    }

    if let Some(successor) = promote_series_successor(&transaction, connection)? {
        tracing::debug!("transaction {successor} now leads the series of {}", transaction.id);
    }
    delete_transaction_row(transaction.id, connection)?;

    let balances = recalculate_balances(&touched_accounts, connection)?;

    Ok(DeleteTransactionResponse {
        deleted_ids,
        balances,
    })
}

/// A route handler for deleting a transaction.
pub async fn delete_transaction_endpoint(
    State(state): State<DeleteTransactionState>,
    Path(transaction_id): Path<TransactionId>,
    headers: HeaderMap,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match idempotent_atomic(
        key.as_deref(),
        "delete_transaction",
        &connection,
        |connection| delete_transaction(transaction_id, connection),
    ) {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            tracing::error!("Could not delete transaction {transaction_id}: {error}");
            error.into_response()
        }
    }
}
