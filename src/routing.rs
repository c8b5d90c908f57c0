//! Application router configuration.

use axum::{
    Json, Router,
    http::{StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};

use crate::{
    AppState, ErrorBody, ErrorKind,
    account::{
        create_account_endpoint, delete_account_endpoint, edit_account_endpoint,
        get_account_endpoint,
    },
    endpoints,
    journal::{get_unbalanced_endpoint, set_ledger_category_endpoint},
    logging::logging_middleware,
    orchestrator::{
        create_installments_endpoint, generate_recurring_endpoint, import_accounts_endpoint,
        pay_bill_endpoint, transfer_endpoint,
    },
    period_lock::lock_period_endpoint,
    transaction::{
        create_transaction_endpoint, delete_transaction_endpoint, edit_transaction_endpoint,
    },
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::TRANSACTIONS, post(create_transaction_endpoint))
        .route(
            endpoints::TRANSACTION,
            put(edit_transaction_endpoint).delete(delete_transaction_endpoint),
        )
        .route(endpoints::INSTALLMENTS, post(create_installments_endpoint))
        .route(endpoints::RECURRING, post(generate_recurring_endpoint))
        .route(endpoints::TRANSFERS, post(transfer_endpoint))
        .route(endpoints::PAY_BILL, post(pay_bill_endpoint))
        .route(endpoints::ACCOUNTS, post(create_account_endpoint))
        .route(
            endpoints::ACCOUNT,
            get(get_account_endpoint)
                .put(edit_account_endpoint)
                .delete(delete_account_endpoint),
        )
        .route(
            endpoints::ACCOUNT_LEDGER_CATEGORY,
            put(set_ledger_category_endpoint),
        )
        .route(endpoints::IMPORT_ACCOUNTS, post(import_accounts_endpoint))
        .route(endpoints::LOCK_PERIOD, post(lock_period_endpoint))
        .route(endpoints::UNBALANCED, get(get_unbalanced_endpoint))
        .fallback(get_404_not_found)
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

async fn get_404_not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            success: false,
            error: "not found".to_owned(),
            error_message: format!("there is no route for {uri}"),
            code: "ROUTE_NOT_FOUND".to_owned(),
            kind: ErrorKind::NotFound,
            details: None,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        AppState, ErrorBody, ErrorKind, LedgerConfig,
        account::AccountResponse,
        endpoints::{self, format_endpoint},
        orchestrator::PairedTransaction,
    };

    use super::build_router;

    fn get_test_server() -> TestServer {
        let state = AppState::new(
            Connection::open_in_memory().unwrap(),
            LedgerConfig::default(),
        )
        .unwrap();

        TestServer::new(build_router(state))
    }

    #[tokio::test]
    async fn unknown_route_is_json_not_found() {
        let server = get_test_server();

        let response = server.get("/api/nothing").await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body = response.json::<ErrorBody>();
        assert!(!body.success);
        assert_eq!(body.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pay_bill_through_router() {
        let server = get_test_server();
        let card = server
            .post(endpoints::ACCOUNTS)
            .json(&json!({
                "name": "Visa",
                "account_type": "credit",
                "credit_limit": 500_000,
                "billing_cycle": { "closing_day": 20, "due_day": 10 }
            }))
            .await
            .json::<AccountResponse>()
            .account;
        let checking = server
            .post(endpoints::ACCOUNTS)
            .json(&json!({ "name": "Everyday", "account_type": "checking" }))
            .await
            .json::<AccountResponse>()
            .account;

        let response = server
            .post(endpoints::PAY_BILL)
            .json(&json!({
                "credit_account_id": card.id,
                "debit_account_id": checking.id,
                "amount": 10_000,
                "payment_date": "2025-04-10"
            }))
            .await;

        response.assert_status_ok();
        let paired = response.json::<PairedTransaction>();
        assert!(paired.success);
        assert_eq!(paired.debit_balance, -10_000);
        assert_eq!(paired.credit_balance, 10_000);

        let card = server
            .get(&format_endpoint(endpoints::ACCOUNT, card.id))
            .await
            .json::<AccountResponse>()
            .account;
        assert_eq!(card.balance, 10_000);
    }

    #[tokio::test]
    async fn credit_limit_error_is_machine_readable() {
        let server = get_test_server();
        let card = server
            .post(endpoints::ACCOUNTS)
            .json(&json!({ "name": "Visa", "account_type": "credit", "credit_limit": 1_000 }))
            .await
            .json::<AccountResponse>()
            .account;

        let response = server
            .post(endpoints::TRANSACTIONS)
            .json(&json!({
                "account_id": card.id,
                "amount": -1_500,
                "date": "2025-04-10",
                "transaction_type": "expense"
            }))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body = response.json::<ErrorBody>();
        assert_eq!(body.code, "CREDIT_LIMIT_EXCEEDED");
        assert_eq!(body.kind, ErrorKind::Constraint);
        assert_eq!(
            body.details,
            Some(json!({ "limit": 1_000, "requested": 1_500, "available": 1_000 }))
        );
    }
}
