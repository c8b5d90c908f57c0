//! Derives account balances from their transactions.
//!
//! Balances are never adjusted by a delta. Every write that touches an
//! account's transactions finishes by recomputing the balance from scratch.

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    account::{Account, AccountType},
    database_id::AccountId,
    transaction::{Transaction, TransactionStatus},
};

/// An account's balance after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account the balance belongs to.
    pub account_id: AccountId,
    /// The recomputed balance in minor units.
    pub balance: i64,
}

/// The sum of the signed amounts of the completed transactions in `transactions`.
///
/// Pending transactions are ignored.
pub fn sum_completed(transactions: &[Transaction]) -> i64 {
    transactions
        .iter()
        .filter(|transaction| transaction.status == TransactionStatus::Completed)
        .map(|transaction| transaction.amount)
        .sum()
}

/// Recompute the balance of `account_id` from its completed transactions and
/// store it on the account.
///
/// Calling this function again without any other writes returns the same balance.
///
/// # Errors
/// This function will return a:
/// - [Error::AccountNotFound] if `account_id` does not refer to an account,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn recalculate_balance(account_id: AccountId, connection: &Connection) -> Result<i64, Error> {
    let balance = connection
        .prepare(
            "UPDATE account
             SET balance = (
                SELECT COALESCE(SUM(amount), 0) FROM \"transaction\"
                WHERE account_id = ?1 AND status = 'completed'
             )
             WHERE id = ?1
             RETURNING balance",
        )?
        .query_row(params![account_id], |row| row.get(0))
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::AccountNotFound(account_id),
            error => error.into(),
        })?;

    tracing::debug!("Recalculated balance of account {account_id}: {balance}");

    Ok(balance)
}

/// Recompute the balances of several accounts, skipping repeated IDs.
///
/// # Errors
/// Returns the first error from [recalculate_balance].
pub fn recalculate_balances(
    account_ids: &[AccountId],
    connection: &Connection,
) -> Result<Vec<AccountBalance>, Error> {
    let mut balances: Vec<AccountBalance> = Vec::with_capacity(account_ids.len());

    for &account_id in account_ids {
        if balances.iter().any(|balance| balance.account_id == account_id) {
            continue;
        }

        let balance = recalculate_balance(account_id, connection)?;
        balances.push(AccountBalance {
            account_id,
            balance,
        });
    }

    Ok(balances)
}

/// Check that spending `amount` on `account` keeps it within its credit limit.
///
/// Inflows and accounts without a credit limit always pass.
///
/// # Errors
/// Returns [Error::CreditLimitExceeded] naming the limit, the requested amount
/// and the credit that is still available.
pub fn check_credit_limit(account: &Account, amount: i64) -> Result<(), Error> {
    if account.account_type != AccountType::Credit || amount >= 0 {
        return Ok(());
    }

    let (Some(limit), Some(available)) = (account.credit_limit, account.available_credit()) else {
        return Ok(());
    };

    let requested = -amount;

    if requested > available {
        return Err(Error::CreditLimitExceeded {
            limit,
            requested,
            available,
        });
    }

    Ok(())
}
