//! Importing accounts together with their opening balances.

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
    account::{Account, NewAccount, create_account, get_account, recalculate_balance},
    date_format::iso_date,
    idempotency::{idempotency_key, idempotent},
    orchestrator::UndoStep,
    period_lock::check_period_open,
    transaction::{Transaction, TransactionType, insert_transaction},
};

/// The description given to opening balance transactions.
pub const OPENING_BALANCE_DESCRIPTION: &str = "Opening balance";

/// An account to import and the balance it starts with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedAccount {
    /// The account to create.
    #[serde(flatten)]
    pub account: NewAccount,
    /// The balance in minor units on `opening_date`. Zero means no opening transaction.
    #[serde(default)]
    pub opening_balance: i64,
    /// The date of the opening balance transaction.
    #[serde(with = "iso_date")]
    pub opening_date: Date,
}

/// The request body for importing accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountImport {
    /// The accounts to create, in order.
    pub accounts: Vec<ImportedAccount>,
}

/// The response to importing accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportAccountsResponse {
    /// The created accounts with their balances.
    pub accounts: Vec<Account>,
}

/// Create every account in `import` with an opening balance transaction.
///
/// Either all accounts are created or none are. Opening balances may not be in
/// a locked period but are not checked against credit limits, since they
/// record what is already owed.
///
/// # Errors
/// This function will return a:
/// - validation [Error] for an invalid account,
/// - or [Error::DuplicateAccountName] if an account name is taken,
/// - or [Error::PeriodLocked] if an opening date is in a locked period,
/// - or [Error::PartialWrite] if a later step failed and the created accounts
///   could not be deleted.
pub fn import_accounts(
    import: &AccountImport,
    key: Option<&str>,
    connection: &Connection,
) -> Result<ImportAccountsResponse, Error> {
    idempotent(key, "import_accounts", connection, |compensation| {
        let mut accounts = Vec::with_capacity(import.accounts.len());

        for imported in &import.accounts {
            if imported.opening_balance != 0 {
                check_period_open(imported.opening_date, connection)?;
            }

            let account = compensation.check(
                &format!("creating account {:?}", imported.account.name),
                create_account(&imported.account, connection),
            )?;
            compensation.record(UndoStep::DeleteAccount(account.id));

            if imported.opening_balance == 0 {
                accounts.push(account);
                continue;
            }

            let transaction_type = if imported.opening_balance > 0 {
                TransactionType::Income
            } else {
                TransactionType::Expense
            };
            let opening = Transaction::build(
                account.id,
                imported.opening_balance,
                imported.opening_date,
                transaction_type,
            )
            .description(OPENING_BALANCE_DESCRIPTION);

            let transaction = compensation.check(
                &format!("creating the opening balance of account {}", account.id),
                insert_transaction(&opening, &account, connection),
            )?;
            compensation.record(UndoStep::DeleteTransaction(transaction.id));
            compensation.touch(account.id);

            compensation.check(
                "recalculating the balance",
                recalculate_balance(account.id, connection),
            )?;
            accounts.push(compensation.check(
                "reading the imported account",
                get_account(account.id, connection),
            )?);
        }

        Ok(ImportAccountsResponse { accounts })
    })
}

/// The state needed to import accounts.
#[derive(Debug, Clone)]
pub struct ImportAccountsState {
    /// The database connection for managing accounts.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for ImportAccountsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for importing accounts.
pub async fn import_accounts_endpoint(
    State(state): State<ImportAccountsState>,
    headers: HeaderMap,
    Json(import): Json<AccountImport>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match import_accounts(&import, key.as_deref(), &connection) {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => {
            tracing::error!(
                "Could not import {} accounts: {error}",
                import.accounts.len()
            );
            error.into_response()
        }
    }
}
