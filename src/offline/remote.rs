//! The server the offline queue replays against.

use std::future::Future;

use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    ErrorBody,
    endpoints::{self, format_endpoint},
    idempotency::IDEMPOTENCY_KEY_HEADER,
    offline::mutation::{ServerEffect, ServerRequest},
};

/// Why the server did not accept a replayed mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The server could not be reached or was temporarily unavailable.
    /// Sending the same mutation again later may succeed.
    #[error("could not reach the server: {0}")]
    Transient(String),

    /// The server rejected the mutation. Sending it again will not help.
    #[error("the server rejected the request with {status} {code}: {message}")]
    Rejected {
        /// The HTTP status code.
        status: u16,
        /// The machine readable error code from the response body.
        code: String,
        /// The error message from the response body.
        message: String,
    },
}

impl RemoteError {
    /// Whether the mutation should stay queued and be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// The ledger server as seen by the offline queue.
pub trait LedgerApi {
    /// Send `request` tagged with the idempotency key `key`.
    ///
    /// Sending the same key twice must not apply the request twice.
    fn send(
        &self,
        key: &str,
        request: &ServerRequest,
    ) -> impl Future<Output = Result<ServerEffect, RemoteError>> + Send;
}

/// A [LedgerApi] that talks to the JSON API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedgerApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerApi {
    /// Create a client for the server at `base_url`, e.g. "http://127.0.0.1:3000".
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client that sends requests with `client`, e.g. one with a timeout.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        key: &str,
        body: Option<&B>,
    ) -> Result<T, RemoteError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .header(IDEMPOTENCY_KEY_HEADER, key);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RemoteError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|error| RemoteError::Transient(format!("could not read response: {error}")))
    }
}

impl LedgerApi for HttpLedgerApi {
    async fn send(&self, key: &str, request: &ServerRequest) -> Result<ServerEffect, RemoteError> {
        tracing::debug!("sending {request:?} with key {key}");

        match request {
            ServerRequest::CreateTransaction(builder) => self
                .send_json(Method::POST, endpoints::TRANSACTIONS, key, Some(builder))
                .await
                .map(ServerEffect::TransactionCreated),
            ServerRequest::EditTransaction {
                transaction_id,
                edit,
            } => self
                .send_json(
                    Method::PUT,
                    &format_endpoint(endpoints::TRANSACTION, *transaction_id),
                    key,
                    Some(edit),
                )
                .await
                .map(ServerEffect::TransactionEdited),
            ServerRequest::DeleteTransaction { transaction_id } => self
                .send_json(
                    Method::DELETE,
                    &format_endpoint(endpoints::TRANSACTION, *transaction_id),
                    key,
                    None::<&()>,
                )
                .await
                .map(ServerEffect::TransactionsDeleted),
            ServerRequest::Transfer(transfer) => self
                .send_json(Method::POST, endpoints::TRANSFERS, key, Some(transfer))
                .await
                .map(ServerEffect::Transferred),
            ServerRequest::EditAccount { account_id, edit } => self
                .send_json(
                    Method::PUT,
                    &format_endpoint(endpoints::ACCOUNT, *account_id),
                    key,
                    Some(edit),
                )
                .await
                .map(ServerEffect::AccountEdited),
            ServerRequest::DeleteAccount { account_id } => self
                .send_json(
                    Method::DELETE,
                    &format_endpoint(endpoints::ACCOUNT, *account_id),
                    key,
                    None::<&()>,
                )
                .await
                .map(ServerEffect::AccountDeleted),
            ServerRequest::ImportAccounts(import) => self
                .send_json(Method::POST, endpoints::IMPORT_ACCOUNTS, key, Some(import))
                .await
                .map(ServerEffect::AccountsImported),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn error_from_response(response: reqwest::Response) -> RemoteError {
    let status = response.status();

    match response.json::<ErrorBody>().await {
        Ok(body) if is_retryable_status(status) || body.kind.is_retryable() => {
            RemoteError::Transient(body.error)
        }
        Ok(body) => RemoteError::Rejected {
            status: status.as_u16(),
            code: body.code,
            message: body.error,
        },
        Err(_) if is_retryable_status(status) => RemoteError::Transient(status.to_string()),
        Err(_) => RemoteError::Rejected {
            status: status.as_u16(),
            code: format!("HTTP_{}", status.as_u16()),
            message: status.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, http::StatusCode, routing::post};
    use rusqlite::Connection;
    use serde_json::json;
    use time::macros::date;
    use tokio::net::TcpListener;

    use crate::{
        AppState, LedgerConfig, build_router,
        offline::mutation::{ServerEffect, ServerRequest},
        transaction::{Transaction, TransactionType},
    };

    use super::{HttpLedgerApi, LedgerApi, RemoteError};

    async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });

        format!("http://{address}")
    }

    async fn spawn_ledger() -> (String, Arc<Mutex<Connection>>) {
        let state = AppState::new(
            Connection::open_in_memory().unwrap(),
            LedgerConfig::default(),
        )
        .unwrap();
        let connection = state.db_connection.clone();

        (spawn(build_router(state)).await, connection)
    }

    #[tokio::test]
    async fn validation_error_is_rejected() {
        let (base_url, _) = spawn_ledger().await;
        let api = HttpLedgerApi::new(&base_url);
        let request = ServerRequest::CreateTransaction(Transaction::build(
            99,
            -500,
            date!(2025 - 03 - 01),
            TransactionType::Expense,
        ));

        let error = api.send("key-1", &request).await.unwrap_err();

        assert!(!error.is_retryable());
        assert!(matches!(
            error,
            RemoteError::Rejected { status: 404, ref code, .. } if code == "ACCOUNT_NOT_FOUND"
        ));
    }

    #[tokio::test]
    async fn unavailable_server_is_transient() {
        let router = Router::new().route(
            "/api/transfers",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "success": false,
                        "error": "the database is temporarily unavailable",
                        "error_message": "the database is temporarily unavailable",
                        "code": "STORAGE_UNAVAILABLE",
                        "kind": "transient"
                    })),
                )
            }),
        );
        let api = HttpLedgerApi::new(&spawn(router).await);
        let request = ServerRequest::Transfer(crate::orchestrator::TransferRequest {
            from_account_id: 1,
            to_account_id: 2,
            amount: 100,
            date: date!(2025 - 03 - 01),
            description: None,
        });

        let error = api.send("key-1", &request).await.unwrap_err();

        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let api = HttpLedgerApi::new(&format!("http://{address}"));

        let error = api
            .send("key-1", &ServerRequest::DeleteAccount { account_id: 1 })
            .await
            .unwrap_err();

        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn same_key_is_applied_once() {
        let (base_url, connection) = spawn_ledger().await;
        let account_id = {
            let connection = connection.lock().unwrap();
            crate::account::create_account(
                &crate::account::NewAccount {
                    name: "Everyday".to_owned(),
                    account_type: crate::account::AccountType::Checking,
                    credit_limit: None,
                    billing_cycle: None,
                },
                &connection,
            )
            .unwrap()
            .id
        };
        let api = HttpLedgerApi::new(&base_url);
        let request = ServerRequest::CreateTransaction(
            Transaction::build(
                account_id,
                2_000,
                date!(2025 - 03 - 01),
                TransactionType::Income,
            )
            .description("Pay"),
        );

        let first = api.send("same-key", &request).await.unwrap();
        let second = api.send("same-key", &request).await.unwrap();

        assert_eq!(first, second);
        let ServerEffect::TransactionCreated(created) = first else {
            panic!("want a created transaction, got {first:?}");
        };
        assert_eq!(created.balance, 2_000);
        let count =
            crate::transaction::count_transactions(&connection.lock().unwrap()).unwrap();
        assert_eq!(count, 1);
    }
}
