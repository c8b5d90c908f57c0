//! Maps accounts to the ledger categories journal entries are booked against.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{AppState, Error, account::get_account, database_id::AccountId};

/// Looks up the ledger category of an account.
pub trait ChartOfAccounts {
    /// The ledger category of `account_id`, or `None` if the account is not mapped.
    ///
    /// # Errors
    /// Returns an error if the mapping could not be read.
    fn ledger_category(&self, account_id: AccountId) -> Result<Option<String>, Error>;
}

impl ChartOfAccounts for Connection {
    fn ledger_category(&self, account_id: AccountId) -> Result<Option<String>, Error> {
        self.query_row(
            "SELECT category FROM ledger_category WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }
}

/// Map `account_id` to the ledger category `category`, replacing any previous mapping.
///
/// # Errors
/// This function will return a:
/// - [Error::AccountNotFound] if the account does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_ledger_category(
    account_id: AccountId,
    category: &str,
    connection: &Connection,
) -> Result<(), Error> {
    get_account(account_id, connection)?;

    connection.execute(
        "INSERT INTO ledger_category (account_id, category) VALUES (?1, ?2)
         ON CONFLICT(account_id) DO UPDATE SET category = excluded.category",
        params![account_id, category],
    )?;

    Ok(())
}

/// The state needed to map accounts to ledger categories.
#[derive(Debug, Clone)]
pub struct LedgerCategoryState {
    /// The database connection for managing ledger categories.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for LedgerCategoryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The body for setting an account's ledger category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCategory {
    /// The ledger category, e.g. "liabilities:visa".
    pub category: String,
}

/// A route handler for mapping an account to a ledger category.
pub async fn set_ledger_category_endpoint(
    State(state): State<LedgerCategoryState>,
    Path(account_id): Path<AccountId>,
    Json(body): Json<LedgerCategory>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    match set_ledger_category(account_id, &body.category, &connection) {
        Ok(()) => Json(body).into_response(),
        Err(error) => {
            tracing::error!("Could not set the ledger category of account {account_id}: {error}");
            error.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        account::{AccountType, NewAccount, create_account},
        db::initialize,
    };

    use super::{ChartOfAccounts, set_ledger_category};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn unmapped_account_has_no_category() {
        let conn = get_test_connection();

        assert_eq!(conn.ledger_category(1), Ok(None));
    }

    #[test]
    fn mapping_can_be_replaced() {
        let conn = get_test_connection();
        let account = create_account(
            &NewAccount {
                name: "Everyday".to_owned(),
                account_type: AccountType::Checking,
                credit_limit: None,
                billing_cycle: None,
            },
            &conn,
        )
        .unwrap();

        set_ledger_category(account.id, "assets:bank", &conn).unwrap();
        set_ledger_category(account.id, "assets:everyday", &conn).unwrap();

        assert_eq!(
            conn.ledger_category(account.id),
            Ok(Some("assets:everyday".to_owned()))
        );
    }

    #[test]
    fn mapping_missing_account_fails() {
        let conn = get_test_connection();

        assert_eq!(
            set_ledger_category(4, "assets", &conn),
            Err(Error::AccountNotFound(4))
        );
    }
}
