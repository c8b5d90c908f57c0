//! Defines the endpoints for creating and getting accounts.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    account::{Account, NewAccount, create_account, get_account},
    database_id::AccountId,
    idempotency::{idempotency_key, idempotent_atomic},
};

/// The state needed to get or create an account.
#[derive(Debug, Clone)]
pub struct CreateAccountState {
    /// The database connection for managing accounts.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CreateAccountState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The response holding a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountResponse {
    /// The account.
    pub account: Account,
}

/// A route handler for creating a new account.
pub async fn create_account_endpoint(
    State(state): State<CreateAccountState>,
    headers: HeaderMap,
    Json(new_account): Json<NewAccount>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("Could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match idempotent_atomic(key.as_deref(), "create_account", &connection, |connection| {
        create_account(&new_account, connection).map(|account| AccountResponse { account })
    }) {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => {
            tracing::error!("Could not create account with {new_account:?}: {error}");
            error.into_response()
        }
    }
}

/// A route handler for getting an account and its current balance.
pub async fn get_account_endpoint(
    State(state): State<CreateAccountState>,
    Path(account_id): Path<AccountId>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("Could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    match get_account(account_id, &connection) {
        Ok(account) => Json(AccountResponse { account }).into_response(),
        Err(error) => error.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::StatusCode,
        routing::{get, post},
    };
    use axum_test::TestServer;
    use rusqlite::Connection;

    use crate::{
        AppState, ErrorBody, LedgerConfig,
        account::{AccountType, NewAccount},
        billing::BillingCycle,
        endpoints::{self, format_endpoint},
    };

    use super::{AccountResponse, create_account_endpoint, get_account_endpoint};

    fn get_test_server() -> TestServer {
        let state = AppState::new(
            Connection::open_in_memory().unwrap(),
            LedgerConfig::default(),
        )
        .unwrap();
        let app = Router::new()
            .route(endpoints::ACCOUNTS, post(create_account_endpoint))
            .route(endpoints::ACCOUNT, get(get_account_endpoint))
            .with_state(state);

        TestServer::new(app)
    }

    fn visa() -> NewAccount {
        NewAccount {
            name: "Visa".to_owned(),
            account_type: AccountType::Credit,
            credit_limit: Some(250_000),
            billing_cycle: Some(BillingCycle::new(20, 10).unwrap()),
        }
    }

    #[tokio::test]
    async fn can_create_and_get_account() {
        let server = get_test_server();

        let created = server.post(endpoints::ACCOUNTS).json(&visa()).await;
        created.assert_status(StatusCode::CREATED);
        let created: AccountResponse = created.json();

        let fetched = server
            .get(&format_endpoint(endpoints::ACCOUNT, created.account.id))
            .await;

        fetched.assert_status_ok();
        assert_eq!(fetched.json::<AccountResponse>(), created);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let server = get_test_server();
        server
            .post(endpoints::ACCOUNTS)
            .json(&visa())
            .await
            .assert_status(StatusCode::CREATED);

        let response = server.post(endpoints::ACCOUNTS).json(&visa()).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorBody>().code, "DUPLICATE_ACCOUNT_NAME");
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let server = get_test_server();

        let response = server
            .get(&format_endpoint(endpoints::ACCOUNT, 99))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }
}
