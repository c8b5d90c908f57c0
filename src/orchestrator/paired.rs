//! Transfers and bill payments: one real-world payment written as two linked
//! transactions on different accounts.

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
    account::{Account, AccountType, check_credit_limit, get_account, recalculate_balance},
    database_id::AccountId,
    date_format::iso_date,
    idempotency::{idempotency_key, idempotent},
    journal::{ChartOfAccounts, balanced_pair, insert_journal_entry},
    orchestrator::{Compensation, UndoStep},
    period_lock::check_period_open,
    transaction::{Transaction, TransactionType, insert_transaction, link_transactions},
};

/// Move money between two of the user's accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// The account the money leaves.
    pub from_account_id: AccountId,
    /// The account the money arrives in.
    pub to_account_id: AccountId,
    /// The positive amount in minor units.
    pub amount: i64,
    /// When the transfer happened.
    #[serde(with = "iso_date")]
    pub date: Date,
    /// Describes both halves of the transfer.
    #[serde(default)]
    pub description: Option<String>,
}

/// Pay off a credit card from a non-credit account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillPayment {
    /// The credit card being paid off.
    pub credit_account_id: AccountId,
    /// The account the payment comes from.
    pub debit_account_id: AccountId,
    /// The positive amount in minor units.
    pub amount: i64,
    /// When the payment was made.
    #[serde(with = "iso_date")]
    pub payment_date: Date,
    /// Describes both halves of the payment.
    #[serde(default)]
    pub description: Option<String>,
}

/// The two halves of a transfer or bill payment and the balances after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedTransaction {
    /// The outflow on the account the money left.
    pub debit_tx: Transaction,
    /// The inflow on the account the money arrived in.
    pub credit_tx: Transaction,
    /// The balance of the account the money left.
    pub debit_balance: i64,
    /// The balance of the account the money arrived in.
    pub credit_balance: i64,
    /// Always true, mirrors the `success: false` of error bodies.
    pub success: bool,
}

struct PairedLegs<'a> {
    source: &'a Account,
    destination: &'a Account,
    amount: i64,
    date: Date,
    outflow_description: String,
    inflow_description: String,
}

/// Move `request.amount` from one account to another.
///
/// # Errors
/// This function will return a:
/// - [Error::NonPositiveAmount] if the amount is zero or negative,
/// - or [Error::SameAccount] if both sides are the same account,
/// - or [Error::AccountNotFound] if either account does not exist,
/// - or [Error::PeriodLocked] if the date is in a locked period,
/// - or [Error::CreditLimitExceeded] if the source is a credit account without enough credit,
/// - or the step error, or [Error::PartialWrite] if a later step failed and
///   the earlier steps could not be undone.
pub fn transfer(
    request: &TransferRequest,
    key: Option<&str>,
    connection: &Connection,
) -> Result<PairedTransaction, Error> {
    idempotent(key, "transfer", connection, |compensation| {
        if request.amount <= 0 {
            return Err(Error::NonPositiveAmount(request.amount));
        }

        if request.from_account_id == request.to_account_id {
            return Err(Error::SameAccount(request.from_account_id));
        }

        let source = get_account(request.from_account_id, connection)?;
        let destination = get_account(request.to_account_id, connection)?;
        check_period_open(request.date, connection)?;
        check_credit_limit(&source, -request.amount)?;

        let (outflow_description, inflow_description) = match &request.description {
            Some(description) => (description.clone(), description.clone()),
            None => (
                format!("Transfer to {}", destination.name),
                format!("Transfer from {}", source.name),
            ),
        };

        write_paired(
            PairedLegs {
                source: &source,
                destination: &destination,
                amount: request.amount,
                date: request.date,
                outflow_description,
                inflow_description,
            },
            compensation,
            connection,
        )
    })
}

/// Pay `payment.amount` off a credit card.
///
/// The debit account gets the outflow and the credit account the inflow, which
/// reduces what is owed on the card.
///
/// # Errors
/// This function will return a:
/// - [Error::NonPositiveAmount] if the amount is zero or negative,
/// - or [Error::SameAccount] if both sides are the same account,
/// - or [Error::AccountNotFound] if either account does not exist,
/// - or [Error::NotACreditAccount] if the account being paid is not a credit account,
/// - or [Error::PaymentFromCreditAccount] if the payment comes from a credit account,
/// - or [Error::PeriodLocked] if the payment date is in a locked period,
/// - or the step error, or [Error::PartialWrite] if a later step failed and
///   the earlier steps could not be undone.
pub fn pay_bill(
    payment: &BillPayment,
    key: Option<&str>,
    connection: &Connection,
) -> Result<PairedTransaction, Error> {
    idempotent(key, "pay_bill", connection, |compensation| {
        if payment.amount <= 0 {
            return Err(Error::NonPositiveAmount(payment.amount));
        }

        if payment.credit_account_id == payment.debit_account_id {
            return Err(Error::SameAccount(payment.credit_account_id));
        }

        let credit_account = get_account(payment.credit_account_id, connection)?;
        let debit_account = get_account(payment.debit_account_id, connection)?;

        if credit_account.account_type != AccountType::Credit {
            return Err(Error::NotACreditAccount(credit_account.id));
        }

        if debit_account.account_type == AccountType::Credit {
            return Err(Error::PaymentFromCreditAccount(debit_account.id));
        }

        check_period_open(payment.payment_date, connection)?;

        let (outflow_description, inflow_description) = match &payment.description {
            Some(description) => (description.clone(), description.clone()),
            None => (
                format!("Payment to {}", credit_account.name),
                format!("Payment from {}", debit_account.name),
            ),
        };

        write_paired(
            PairedLegs {
                source: &debit_account,
                destination: &credit_account,
                amount: payment.amount,
                date: payment.payment_date,
                outflow_description,
                inflow_description,
            },
            compensation,
            connection,
        )
    })
}

fn write_paired(
    legs: PairedLegs,
    compensation: &mut Compensation,
    connection: &Connection,
) -> Result<PairedTransaction, Error> {
    let PairedLegs {
        source,
        destination,
        amount,
        date,
        outflow_description,
        inflow_description,
    } = legs;

    let outflow = Transaction::build(source.id, -amount, date, TransactionType::Transfer)
        .description(&outflow_description);
    let mut debit_tx = compensation.check(
        "inserting the outflow",
        insert_transaction(&outflow, source, connection),
    )?;
    compensation.record(UndoStep::DeleteTransaction(debit_tx.id));
    compensation.touch(source.id);

    let inflow = Transaction::build(destination.id, amount, date, TransactionType::Transfer)
        .description(&inflow_description);
    let mut credit_tx = compensation.check(
        "inserting the inflow",
        insert_transaction(&inflow, destination, connection),
    )?;
    compensation.record(UndoStep::DeleteTransaction(credit_tx.id));
    compensation.touch(destination.id);

    compensation.check(
        "linking the transactions",
        link_transactions(debit_tx.id, credit_tx.id, connection),
    )?;
    debit_tx.linked_transaction_id = Some(credit_tx.id);
    credit_tx.linked_transaction_id = Some(debit_tx.id);

    let source_category = compensation.check(
        "looking up the source ledger category",
        connection.ledger_category(source.id),
    )?;
    let destination_category = compensation.check(
        "looking up the destination ledger category",
        connection.ledger_category(destination.id),
    )?;

    if let (Some(debit_category), Some(credit_category)) = (destination_category, source_category)
    {
        compensation.record(UndoStep::DeleteJournalEntries(debit_tx.id));

        for entry in balanced_pair(
            debit_tx.id,
            amount,
            &debit_category,
            &credit_category,
            &outflow_description,
            date,
        ) {
            compensation.check(
                "inserting a journal entry",
                insert_journal_entry(&entry, connection),
            )?;
        }
    }

    let debit_balance = compensation.check(
        "recalculating the source balance",
        recalculate_balance(source.id, connection),
    )?;
    let credit_balance = compensation.check(
        "recalculating the destination balance",
        recalculate_balance(destination.id, connection),
    )?;

    Ok(PairedTransaction {
        debit_tx,
        credit_tx,
        debit_balance,
        credit_balance,
        success: true,
    })
}

/// The state needed to write paired transactions.
#[derive(Debug, Clone)]
pub struct PairedTransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for PairedTransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for transferring money between accounts.
pub async fn transfer_endpoint(
    State(state): State<PairedTransactionState>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match transfer(&request, key.as_deref(), &connection) {
        Ok(paired) => (StatusCode::CREATED, Json(paired)).into_response(),
        Err(error) => {
            tracing::error!(
                "Could not transfer {} from account {} to account {}: {error}",
                request.amount,
                request.from_account_id,
                request.to_account_id
            );
            error.into_response()
        }
    }
}

/// A route handler for paying off a credit card.
pub async fn pay_bill_endpoint(
    State(state): State<PairedTransactionState>,
    headers: HeaderMap,
    Json(payment): Json<BillPayment>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let key = idempotency_key(&headers);

    match pay_bill(&payment, key.as_deref(), &connection) {
        Ok(paired) => Json(paired).into_response(),
        Err(error) => {
            tracing::error!(
                "Could not pay {} to account {} from account {}: {error}",
                payment.amount,
                payment.credit_account_id,
                payment.debit_account_id
            );
            error.into_response()
        }
    }
}
