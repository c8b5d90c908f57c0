//! Defines the endpoint for creating a new transaction.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    account::recalculate_balance,
    idempotency::{idempotency_key, idempotent_atomic},
    transaction::{Transaction, TransactionBuilder, create_transaction},
};

/// The state needed to create a transaction.
#[derive(Debug, Clone)]
pub struct CreateTransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CreateTransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The response to creating a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    /// The transaction as it was stored.
    pub transaction: Transaction,
    /// The recalculated balance of the transaction's account.
    pub balance: i64,
}

/// Create a transaction and recalculate the balance of its account.
///
/// # Errors
/// Returns the errors of [create_transaction] and [recalculate_balance].
pub fn create_transaction_and_recalculate(
    builder: &TransactionBuilder,
    connection: &Connection,
) -> Result<CreateTransactionResponse, Error> {
    let transaction = create_transaction(builder, connection)?;
    let balance = recalculate_balance(transaction.account_id, connection)?;

    Ok(CreateTransactionResponse {
        transaction,
        balance,
    })
}

/// A route handler for creating a new transaction.
pub async fn create_transaction_endpoint(
    State(state): State<CreateTransactionState>,
    headers: HeaderMap,
    Json(builder): Json<TransactionBuilder>,
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
        "create_transaction",
        &connection,
        |connection| create_transaction_and_recalculate(&builder, connection),
    ) {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => {
            tracing::error!("Could not create transaction with {builder:?}: {error}");
            error.into_response()
        }
    }
}
