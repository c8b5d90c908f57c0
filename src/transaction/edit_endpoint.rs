//! Defines the endpoint for editing a transaction.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    AppState, Error,
    account::{AccountBalance, get_account, recalculate_balances},
    billing::InvoiceMonth,
    database_id::{CategoryId, TransactionId},
    date_format::iso_date,
    idempotency::{idempotency_key, idempotent_atomic},
    journal::restate_journal_entries,
    period_lock::check_period_open,
    transaction::{
        Transaction, TransactionStatus,
        core::{get_transaction, map_transaction_row, resolve_invoice_month, validate_amount},
    },
};

/// The state needed to edit a transaction.
#[derive(Debug, Clone)]
pub struct EditTransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for EditTransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The changes to make to a transaction. Fields left out are not changed.
///
/// The account and type of a transaction cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionEdit {
    /// The new description.
    #[serde(default)]
    pub description: Option<String>,
    /// The new signed amount in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
    /// The new date.
    #[serde(default, with = "iso_date::option")]
    pub date: Option<Date>,
    /// The new status.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    /// The new category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Sets the invoice month by hand.
    #[serde(default)]
    pub invoice_month: Option<InvoiceMonth>,
    /// Go back to the invoice month given by the billing cycle.
    #[serde(default)]
    pub clear_invoice_month_override: bool,
}

/// The response to editing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditTransactionResponse {
    /// The transaction after the edit.
    pub transaction: Transaction,
    /// The recalculated balances of the affected accounts.
    pub balances: Vec<AccountBalance>,
}

/// Apply `edit` to the transaction `id`.
///
/// Edits to the amount, date or status of one half of a paired transaction
/// are mirrored on the other half, and the journal entries of the pair are
/// restated with the new amount and date. Invoice months that were not set by
/// hand follow the new date.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if `id` does not refer to a transaction,
/// - or [Error::PeriodLocked] if the old or new date is in a locked period,
/// - or a validation [Error] if the new amount does not match the type,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn edit_transaction(
    id: TransactionId,
    edit: &TransactionEdit,
    connection: &Connection,
) -> Result<EditTransactionResponse, Error> {
    let existing = get_transaction(id, connection).map_err(|error| match error {
        Error::TransactionNotFound(_) => Error::UpdateMissingTransaction,
        error => error,
    })?;

    check_period_open(existing.date, connection)?;

    let mut updated = existing.clone();
    if let Some(description) = &edit.description {
        description.clone_into(&mut updated.description);
    }
    updated.amount = edit.amount.unwrap_or(existing.amount);
    updated.date = edit.date.unwrap_or(existing.date);
    updated.status = edit.status.unwrap_or(existing.status);
    if edit.category_id.is_some() {
        updated.category_id = edit.category_id;
    }

    validate_amount(updated.amount, updated.transaction_type)?;
    check_period_open(updated.date, connection)?;

    let invoice_month_override = match edit.invoice_month {
        Some(invoice_month) => Some(invoice_month),
        None if existing.invoice_month_overridden && !edit.clear_invoice_month_override => {
            existing.invoice_month
        }
        None => None,
    };
    let account = get_account(existing.account_id, connection)?;
    (updated.invoice_month, updated.invoice_month_overridden) =
        resolve_invoice_month(invoice_month_override, updated.date, &account);

    let transaction = update_transaction_row(&updated, connection)?;
    let mut touched_accounts = vec![transaction.account_id];

    if let Some(linked_id) = existing.linked_transaction_id
        && (edit.amount.is_some() || edit.date.is_some() || edit.status.is_some())
    {
        let partner_account = mirror_on_partner(linked_id, &transaction, connection)?;
        touched_accounts.extend(partner_account);
    }

    if edit.amount.is_some() || edit.date.is_some() {
        let mut recorded = vec![transaction.id];
        recorded.extend(existing.linked_transaction_id);
        let entry_amount = transaction
            .amount
            .checked_abs()
            .ok_or(Error::NegativeEntryAmount(transaction.amount))?;
        restate_journal_entries(&recorded, entry_amount, transaction.date, connection)?;
    }

    let balances = recalculate_balances(&touched_accounts, connection)?;

    Ok(EditTransactionResponse {
        transaction,
        balances,
    })
}

/// Copy the amount, date and status of `transaction` onto its partner.
///
/// Returns the partner's account, or `None` if the partner no longer exists.
fn mirror_on_partner(
    linked_id: TransactionId,
    transaction: &Transaction,
    connection: &Connection,
) -> Result<Option<i64>, Error> {
    let mut partner = match get_transaction(linked_id, connection) {
        Ok(partner) => partner,
        Err(Error::TransactionNotFound(_)) => return Ok(None),
        Err(error) => return Err(error),
    };

    check_period_open(partner.date, connection)?;
    check_period_open(transaction.date, connection)?;

    partner.amount = -transaction.amount;
    partner.date = transaction.date;
    partner.status = transaction.status;

    if !partner.invoice_month_overridden {
        let account = get_account(partner.account_id, connection)?;
        (partner.invoice_month, partner.invoice_month_overridden) =
            resolve_invoice_month(None, partner.date, &account);
    }

    update_transaction_row(&partner, connection)?;

    Ok(Some(partner.account_id))
}

fn update_transaction_row(
    transaction: &Transaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    connection
        .prepare(
            "UPDATE \"transaction\"
             SET description = ?1, amount = ?2, date = ?3, status = ?4, category_id = ?5,
                 invoice_month = ?6, invoice_month_overridden = ?7
             WHERE id = ?8
             RETURNING id, description, amount, date, transaction_type, status, account_id,
                 category_id, invoice_month, invoice_month_overridden, parent_transaction_id,
                 installments, current_installment, linked_transaction_id, recurrence",
        )?
        .query_row(
            params![
                transaction.description,
                transaction.amount,
                transaction.date,
                transaction.status,
                transaction.category_id,
                transaction.invoice_month,
                transaction.invoice_month_overridden,
                transaction.id,
            ],
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingTransaction,
            error => error.into(),
        })
}

/// A route handler for editing a transaction.
pub async fn edit_transaction_endpoint(
    State(state): State<EditTransactionState>,
    Path(transaction_id): Path<TransactionId>,
    headers: HeaderMap,
    Json(edit): Json<TransactionEdit>,
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
        "edit_transaction",
        &connection,
        |connection| edit_transaction(transaction_id, &edit, connection),
    ) {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            tracing::error!("Could not edit transaction {transaction_id} with {edit:?}: {error}");
            error.into_response()
        }
    }
}
