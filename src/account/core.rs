//! Defines the core data models and database queries for accounts.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row, params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{Error, billing::BillingCycle, database_id::AccountId};

// ============================================================================
// MODELS
// ============================================================================

/// What kind of account money is held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// An everyday bank account.
    Checking,
    /// A savings account.
    Savings,
    /// A credit card. Only credit accounts have a credit limit and billing cycle.
    Credit,
    /// A brokerage or other investment account.
    Investment,
}

impl AccountType {
    fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::Credit => "credit",
            AccountType::Investment => "investment",
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(AccountType::Checking),
            "savings" => Ok(AccountType::Savings),
            "credit" => Ok(AccountType::Credit),
            "investment" => Ok(AccountType::Investment),
            _ => Err(()),
        }
    }
}

impl ToSql for AccountType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for AccountType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// A bank account, credit card or other place money is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// The id for the account.
    pub id: AccountId,
    /// The unique, human readable name of the account.
    pub name: String,
    /// What kind of account this is.
    pub account_type: AccountType,
    /// The sum of the account's completed transactions in minor units.
    ///
    /// This is derived state, see [crate::recalculate_balance].
    pub balance: i64,
    /// The most a credit account may owe, in minor units.
    pub credit_limit: Option<i64>,
    /// When a credit account's statements close and are due.
    pub billing_cycle: Option<BillingCycle>,
}

impl Account {
    /// How much more can be spent on the account before reaching its credit
    /// limit, or `None` if the account has no credit limit.
    pub fn available_credit(&self) -> Option<i64> {
        self.credit_limit.map(|limit| limit + self.balance)
    }
}

/// The data needed to create an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    /// The unique, human readable name of the account.
    pub name: String,
    /// What kind of account this is.
    pub account_type: AccountType,
    /// The most a credit account may owe, in minor units.
    #[serde(default)]
    pub credit_limit: Option<i64>,
    /// When a credit account's statements close and are due.
    #[serde(default)]
    pub billing_cycle: Option<BillingCycle>,
}

impl NewAccount {
    /// Check that the account settings are consistent with its type.
    ///
    /// # Errors
    /// Returns a validation [Error] if the name is blank, a non-credit account
    /// has credit settings, the credit limit is negative or the billing cycle
    /// days are not days of the month.
    pub fn validate(&self) -> Result<(), Error> {
        validate_settings(
            &self.name,
            self.account_type,
            self.credit_limit,
            self.billing_cycle,
        )
    }
}

/// The new settings for an existing account.
///
/// The account type cannot be changed, every other setting is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEdit {
    /// The new name of the account.
    pub name: String,
    /// The new credit limit.
    #[serde(default)]
    pub credit_limit: Option<i64>,
    /// The new billing cycle.
    #[serde(default)]
    pub billing_cycle: Option<BillingCycle>,
}

fn validate_settings(
    name: &str,
    account_type: AccountType,
    credit_limit: Option<i64>,
    billing_cycle: Option<BillingCycle>,
) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::EmptyAccountName);
    }

    if account_type != AccountType::Credit && (credit_limit.is_some() || billing_cycle.is_some())
    {
        return Err(Error::CreditSettingsOnNonCreditAccount);
    }

    if let Some(limit) = credit_limit
        && limit < 0
    {
        return Err(Error::NegativeCreditLimit(limit));
    }

    if let Some(cycle) = billing_cycle {
        cycle.validate()?;
    }

    Ok(())
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the account table in the database.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            account_type TEXT NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0,
            credit_limit INTEGER,
            closing_day INTEGER,
            due_day INTEGER
        )",
        (),
    )?;

    Ok(())
}

const SELECT_ACCOUNT: &str =
    "SELECT id, name, account_type, balance, credit_limit, closing_day, due_day FROM account";

/// Map a database row to an [Account].
pub fn map_account_row(row: &Row) -> Result<Account, rusqlite::Error> {
    let id = row.get(0)?;
    let name = row.get(1)?;
    let account_type = row.get(2)?;
    let balance = row.get(3)?;
    let credit_limit = row.get(4)?;
    let closing_day: Option<u8> = row.get(5)?;
    let due_day: Option<u8> = row.get(6)?;

    let billing_cycle = match (closing_day, due_day) {
        (Some(closing_day), Some(due_day)) => Some(BillingCycle {
            closing_day,
            due_day,
        }),
        _ => None,
    };

    Ok(Account {
        id,
        name,
        account_type,
        balance,
        credit_limit,
        billing_cycle,
    })
}

fn map_unique_name_error(error: rusqlite::Error, name: &str) -> Error {
    match error {
        // Code 2067 occurs when a UNIQUE constraint failed.
        rusqlite::Error::SqliteFailure(error, Some(_)) if error.extended_code == 2067 => {
            Error::DuplicateAccountName(name.to_owned())
        }
        error => error.into(),
    }
}

/// Create a new account with a zero balance.
///
/// # Errors
/// This function will return a:
/// - validation [Error] if `account` is invalid, see [NewAccount::validate],
/// - or [Error::DuplicateAccountName] if the name is taken,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_account(account: &NewAccount, connection: &Connection) -> Result<Account, Error> {
    account.validate()?;

    connection
        .prepare(
            "INSERT INTO account (name, account_type, credit_limit, closing_day, due_day)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, name, account_type, balance, credit_limit, closing_day, due_day",
        )?
        .query_row(
            params![
                account.name.trim(),
                account.account_type,
                account.credit_limit,
                account.billing_cycle.map(|cycle| cycle.closing_day),
                account.billing_cycle.map(|cycle| cycle.due_day),
            ],
            map_account_row,
        )
        .map_err(|error| map_unique_name_error(error, account.name.trim()))
}

/// Retrieve an account from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::AccountNotFound] if `id` does not refer to an account,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_account(id: AccountId, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(&format!("{SELECT_ACCOUNT} WHERE id = :id"))?
        .query_row(&[(":id", &id)], map_account_row)
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::AccountNotFound(id),
            error => error.into(),
        })
}

/// Retrieve all accounts ordered by their ID.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_all_accounts(connection: &Connection) -> Result<Vec<Account>, Error> {
    connection
        .prepare(&format!("{SELECT_ACCOUNT} ORDER BY id ASC"))?
        .query_map([], map_account_row)?
        .map(|maybe_account| maybe_account.map_err(|error| error.into()))
        .collect()
}

/// Replace the name, credit limit and billing cycle of the account `id`.
///
/// The caller is responsible for refreshing the invoice months of the
/// account's transactions if the billing cycle changed.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingAccount] if `id` does not refer to an account,
/// - or a validation [Error] if the new settings are invalid for the account type,
/// - or [Error::DuplicateAccountName] if the new name is taken,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_account(
    id: AccountId,
    edit: &AccountEdit,
    connection: &Connection,
) -> Result<Account, Error> {
    let account = get_account(id, connection).map_err(|error| match error {
        Error::AccountNotFound(_) => Error::UpdateMissingAccount,
        error => error,
    })?;

    validate_settings(
        &edit.name,
        account.account_type,
        edit.credit_limit,
        edit.billing_cycle,
    )?;

    connection
        .prepare(
            "UPDATE account
             SET name = ?1, credit_limit = ?2, closing_day = ?3, due_day = ?4
             WHERE id = ?5
             RETURNING id, name, account_type, balance, credit_limit, closing_day, due_day",
        )?
        .query_row(
            params![
                edit.name.trim(),
                edit.credit_limit,
                edit.billing_cycle.map(|cycle| cycle.closing_day),
                edit.billing_cycle.map(|cycle| cycle.due_day),
                id,
            ],
            map_account_row,
        )
        .map_err(|error| map_unique_name_error(error, edit.name.trim()))
}

/// Delete the account `id` along with its transactions and ledger mapping.
///
/// Transactions on other accounts that were linked to a deleted transaction
/// are kept but unlinked.
///
/// # Errors
/// This function will return a:
/// - [Error::DeleteMissingAccount] if `id` does not refer to an account,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_account(id: AccountId, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "UPDATE \"transaction\" SET linked_transaction_id = NULL
         WHERE linked_transaction_id IN (SELECT id FROM \"transaction\" WHERE account_id = ?1)",
        params![id],
    )?;

    let rows_affected = connection.execute("DELETE FROM account WHERE id = ?1", params![id])?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingAccount);
    }

    Ok(())
}
