//! Defines the endpoint for updating an account

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;

use crate::{
    AppState, Error,
    account::{AccountEdit, create_endpoint::AccountResponse, get_account, update_account},
    database_id::AccountId,
    idempotency::{idempotency_key, idempotent_atomic},
    transaction::refresh_invoice_months,
};

/// The state needed to edit an account.
#[derive(Debug, Clone)]
pub struct EditAccountState {
    /// The database connection for managing accounts.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for EditAccountState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// Apply `edit` to the account `id`.
///
/// If the billing cycle changes, the invoice months of the account's
/// transactions that were not set by hand are recomputed.
///
/// # Errors
/// Returns the errors of [update_account] and [refresh_invoice_months].
pub fn edit_account(
    id: AccountId,
    edit: &AccountEdit,
    connection: &Connection,
) -> Result<AccountResponse, Error> {
    let before = get_account(id, connection).map_err(|error| match error {
        Error::AccountNotFound(_) => Error::UpdateMissingAccount,
        error => error,
    })?;

    let account = update_account(id, edit, connection)?;

    if before.billing_cycle != account.billing_cycle {
        let updated = refresh_invoice_months(id, account.billing_cycle, connection)?;
        tracing::info!(
            "Billing cycle of account {id} changed, updated the invoice month of {updated} transaction(s)"
        );
    }

    Ok(AccountResponse { account })
}

/// A route handler for editing an account.
pub async fn edit_account_endpoint(
    State(state): State<EditAccountState>,
    Path(account_id): Path<AccountId>,
    headers: HeaderMap,
    Json(edit): Json<AccountEdit>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match idempotent_atomic(key.as_deref(), "edit_account", &connection, |connection| {
        edit_account(account_id, &edit, connection)
    }) {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            tracing::error!("Could not update account {account_id}: {error}");
            error.into_response()
        }
    }
}
