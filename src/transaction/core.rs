//! Defines the core data models and database queries for transactions.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row, params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    Error,
    account::{Account, AccountType, check_credit_limit, get_account},
    billing::{BillingCycle, InvoiceMonth},
    database_id::{AccountId, CategoryId, TransactionId},
    date_format::iso_date,
    period_lock::check_period_open,
};

// ============================================================================
// MODELS
// ============================================================================

/// Whether money was earned, spent or moved between accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money earned. The amount must be positive.
    Income,
    /// Money spent. The amount must be negative.
    Expense,
    /// One side of money moved between two accounts.
    Transfer,
}

impl TransactionType {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            "transfer" => Ok(TransactionType::Transfer),
            _ => Err(()),
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// Whether a transaction has settled. Only completed transactions count
/// toward an account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Scheduled or not yet settled.
    Pending,
    /// Settled.
    #[default]
    Completed,
}

impl TransactionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            _ => Err(()),
        }
    }
}

impl ToSql for TransactionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransactionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// How often a recurring transaction repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// Every day.
    Daily,
    /// Every seven days.
    Weekly,
    /// On the same day every month, or the last day for shorter months.
    Monthly,
    /// On the same date every year.
    Yearly,
}

impl Recurrence {
    fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Yearly => "yearly",
        }
    }
}

impl FromStr for Recurrence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            "yearly" => Ok(Recurrence::Yearly),
            _ => Err(()),
        }
    }
}

impl ToSql for Recurrence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Recurrence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// An expense, income or one side of a transfer on a single account.
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// A text description of what the transaction was for.
    pub description: String,
    /// The signed amount in minor units. Positive amounts flow into the account.
    pub amount: i64,
    /// When the transaction happened.
    #[serde(with = "iso_date")]
    pub date: Date,
    /// Whether money was earned, spent or moved.
    pub transaction_type: TransactionType,
    /// Whether the transaction has settled.
    pub status: TransactionStatus,
    /// The account the transaction belongs to.
    pub account_id: AccountId,
    /// The spending or income category, owned by the UI.
    pub category_id: Option<CategoryId>,
    /// The credit card statement the transaction is paid in.
    pub invoice_month: Option<InvoiceMonth>,
    /// Whether `invoice_month` was set by hand rather than from the billing cycle.
    pub invoice_month_overridden: bool,
    /// The first transaction of the installment or recurring series this
    /// transaction belongs to.
    pub parent_transaction_id: Option<TransactionId>,
    /// The number of installments in the series.
    pub installments: Option<u32>,
    /// The 1-based position of this transaction in its installment series.
    pub current_installment: Option<u32>,
    /// The other half of a transfer or bill payment.
    pub linked_transaction_id: Option<TransactionId>,
    /// How often the series this transaction starts repeats.
    pub recurrence: Option<Recurrence>,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(
        account_id: AccountId,
        amount: i64,
        date: Date,
        transaction_type: TransactionType,
    ) -> TransactionBuilder {
        TransactionBuilder {
            account_id,
            description: String::new(),
            amount,
            date,
            transaction_type,
            status: TransactionStatus::Completed,
            category_id: None,
            invoice_month: None,
            parent_transaction_id: None,
            recurrence: None,
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// This is also the JSON body for creating a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBuilder {
    /// The account the transaction belongs to.
    pub account_id: AccountId,

    /// A human-readable description of the transaction.
    #[serde(default)]
    pub description: String,

    /// The signed amount in minor units.
    ///
    /// Positive values represent money flowing into the account, negative
    /// values represent money flowing out. The sign must match
    /// `transaction_type`.
    pub amount: i64,

    /// The date when the transaction occurred.
    #[serde(with = "iso_date")]
    pub date: Date,

    /// Whether money was earned, spent or moved.
    pub transaction_type: TransactionType,

    /// Whether the transaction has settled. Defaults to completed.
    #[serde(default)]
    pub status: TransactionStatus,

    /// The spending or income category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,

    /// Sets the invoice month by hand.
    ///
    /// When `None`, transactions on credit accounts with a billing cycle get
    /// the invoice month their date falls in.
    #[serde(default)]
    pub invoice_month: Option<InvoiceMonth>,

    /// The first transaction of the series this transaction belongs to.
    #[serde(skip)]
    pub parent_transaction_id: Option<TransactionId>,

    /// How often the series this transaction starts repeats.
    #[serde(skip)]
    pub recurrence: Option<Recurrence>,
}

impl TransactionBuilder {
    /// Set the description of the transaction.
    pub fn description(mut self, description: &str) -> Self {
        description.clone_into(&mut self.description);
        self
    }

    /// Set whether the transaction has settled.
    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the category of the transaction.
    pub fn category_id(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Override the invoice month of the transaction.
    pub fn invoice_month(mut self, invoice_month: Option<InvoiceMonth>) -> Self {
        self.invoice_month = invoice_month;
        self
    }

    /// Set the first transaction of the series this transaction belongs to.
    pub fn parent_transaction_id(mut self, parent_transaction_id: Option<TransactionId>) -> Self {
        self.parent_transaction_id = parent_transaction_id;
        self
    }

    /// Mark this transaction as the origin of a recurring series.
    pub fn recurrence(mut self, recurrence: Option<Recurrence>) -> Self {
        self.recurrence = recurrence;
        self
    }

    /// Check the amount against the transaction type.
    ///
    /// # Errors
    /// Returns [Error::ZeroAmount] for a zero amount, or [Error::SignMismatch]
    /// for income with a negative amount or an expense with a positive amount.
    pub fn validate(&self) -> Result<(), Error> {
        validate_amount(self.amount, self.transaction_type)
    }
}

pub(crate) fn validate_amount(amount: i64, transaction_type: TransactionType) -> Result<(), Error> {
    let sign_matches = match transaction_type {
        _ if amount == 0 => return Err(Error::ZeroAmount),
        TransactionType::Income => amount > 0,
        TransactionType::Expense => amount < 0,
        TransactionType::Transfer => true,
    };

    if !sign_matches {
        return Err(Error::SignMismatch {
            transaction_type: transaction_type.to_string(),
            amount,
        });
    }

    Ok(())
}

/// The invoice month for a transaction on `date`, and whether it was set by hand.
pub(crate) fn resolve_invoice_month(
    overridden: Option<InvoiceMonth>,
    date: Date,
    account: &Account,
) -> (Option<InvoiceMonth>, bool) {
    if overridden.is_some() {
        return (overridden, true);
    }

    (billing_invoice_month(date, account), false)
}

fn billing_invoice_month(date: Date, account: &Account) -> Option<InvoiceMonth> {
    match (account.account_type, account.billing_cycle) {
        (AccountType::Credit, Some(cycle)) => Some(cycle.invoice_month(date)),
        _ => None,
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL,
                amount INTEGER NOT NULL,
                date TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                status TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                category_id INTEGER,
                invoice_month TEXT,
                invoice_month_overridden INTEGER NOT NULL DEFAULT 0,
                parent_transaction_id INTEGER,
                installments INTEGER,
                current_installment INTEGER,
                linked_transaction_id INTEGER,
                recurrence TEXT,
                FOREIGN KEY(account_id) REFERENCES account(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('transaction', 0)",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_account_status
         ON \"transaction\"(account_id, status);",
        (),
    )?;

    Ok(())
}

const TRANSACTION_COLUMNS: &str = "id, description, amount, date, transaction_type, status, \
    account_id, category_id, invoice_month, invoice_month_overridden, parent_transaction_id, \
    installments, current_installment, linked_transaction_id, recurrence";

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        description: row.get(1)?,
        amount: row.get(2)?,
        date: row.get(3)?,
        transaction_type: row.get(4)?,
        status: row.get(5)?,
        account_id: row.get(6)?,
        category_id: row.get(7)?,
        invoice_month: row.get(8)?,
        invoice_month_overridden: row.get(9)?,
        parent_transaction_id: row.get(10)?,
        installments: row.get(11)?,
        current_installment: row.get(12)?,
        linked_transaction_id: row.get(13)?,
        recurrence: row.get(14)?,
    })
}

/// Create a new transaction in the database from a builder.
///
/// The transaction is checked before it is written: the amount must match the
/// transaction type, the date must not be in a locked period and an expense
/// must fit within a credit account's limit. The account balance is **not**
/// recalculated, the caller must call [crate::recalculate_balance].
///
/// # Errors
/// This function will return a:
/// - validation [Error] if the amount does not match the type,
/// - or [Error::AccountNotFound] if the account does not exist,
/// - or [Error::PeriodLocked] if the date is in a locked period,
/// - or [Error::CreditLimitExceeded] if an expense exceeds the available credit,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    builder: &TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    builder.validate()?;
    let account = get_account(builder.account_id, connection)?;
    check_period_open(builder.date, connection)?;
    check_credit_limit(&account, builder.amount)?;

    insert_transaction(builder, &account, connection)
}

/// Write a transaction for `account` without checking it.
pub(crate) fn insert_transaction(
    builder: &TransactionBuilder,
    account: &Account,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let (invoice_month, invoice_month_overridden) =
        resolve_invoice_month(builder.invoice_month, builder.date, account);

    let transaction = connection
        .prepare(&format!(
            "INSERT INTO \"transaction\" (description, amount, date, transaction_type, status,
                account_id, category_id, invoice_month, invoice_month_overridden,
                parent_transaction_id, recurrence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            params![
                builder.description,
                builder.amount,
                builder.date,
                builder.transaction_type,
                builder.status,
                builder.account_id,
                builder.category_id,
                invoice_month,
                invoice_month_overridden,
                builder.parent_transaction_id,
                builder.recurrence,
            ],
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::TransactionNotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE id = :id"
        ))?
        .query_row(&[(":id", &id)], map_transaction_row)
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::TransactionNotFound(id),
            error => error.into(),
        })
}

/// Retrieve the transactions of `account_id` ordered by date and then ID.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_account_transactions(
    account_id: AccountId,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE account_id = :account_id ORDER BY date ASC, id ASC"
        ))?
        .query_map(&[(":account_id", &account_id)], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(|error| error.into()))
        .collect()
}

/// Retrieve the transactions of the series started by `parent_id`, including
/// the parent, ordered by ID.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_series_transactions(
    parent_id: TransactionId,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE id = :parent_id OR parent_transaction_id = :parent_id ORDER BY id ASC"
        ))?
        .query_map(&[(":parent_id", &parent_id)], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(|error| error.into()))
        .collect()
}

/// Get the total number of transactions in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| {
            row.get(0)
        })
        .map_err(|error| error.into())
}

/// Record the position of transaction `id` in an installment series.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if `id` does not refer to a transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn set_installment_position(
    id: TransactionId,
    parent_id: TransactionId,
    installments: u32,
    current_installment: u32,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE \"transaction\"
         SET parent_transaction_id = ?1, installments = ?2, current_installment = ?3
         WHERE id = ?4",
        params![parent_id, installments, current_installment, id],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingTransaction);
    }

    Ok(())
}

/// Make the earliest remaining member of the series led by `parent` its new
/// parent, so the series stays grouped once `parent` is deleted.
///
/// The new parent points at itself if `parent` did, as installment parents
/// do, and at nothing otherwise. Returns the new parent, or `None` if `parent`
/// leads no other transactions.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn promote_series_successor(
    parent: &Transaction,
    connection: &Connection,
) -> Result<Option<TransactionId>, Error> {
    let successor: Option<TransactionId> = connection.query_row(
        "SELECT MIN(id) FROM \"transaction\" WHERE parent_transaction_id = ?1 AND id != ?1",
        params![parent.id],
        |row| row.get(0),
    )?;

    let Some(successor) = successor else {
        return Ok(None);
    };

    connection.execute(
        "UPDATE \"transaction\" SET parent_transaction_id = ?1
         WHERE parent_transaction_id = ?2 AND id != ?2",
        params![successor, parent.id],
    )?;

    if parent.parent_transaction_id != Some(parent.id) {
        connection.execute(
            "UPDATE \"transaction\" SET parent_transaction_id = NULL WHERE id = ?1",
            params![successor],
        )?;
    }

    Ok(Some(successor))
}

/// Point two transactions at each other as the halves of one paired event.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if either ID does not refer to a transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn link_transactions(
    first: TransactionId,
    second: TransactionId,
    connection: &Connection,
) -> Result<(), Error> {
    let mut statement =
        connection.prepare("UPDATE \"transaction\" SET linked_transaction_id = ?1 WHERE id = ?2")?;

    for (id, linked_id) in [(first, second), (second, first)] {
        if statement.execute(params![linked_id, id])? == 0 {
            return Err(Error::UpdateMissingTransaction);
        }
    }

    Ok(())
}

/// Delete the single transaction `id` and its journal entries.
///
/// # Errors
/// This function will return a:
/// - [Error::DeleteMissingTransaction] if `id` does not refer to a transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn delete_transaction_row(id: TransactionId, connection: &Connection) -> Result<(), Error> {
    let rows_affected =
        connection.execute("DELETE FROM \"transaction\" WHERE id = ?1", params![id])?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingTransaction);
    }

    Ok(())
}

/// Recompute the invoice month of every transaction of `account_id` whose
/// invoice month was not set by hand.
///
/// Used after the billing cycle of an account changes. Returns the number of
/// transactions that were updated.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn refresh_invoice_months(
    account_id: AccountId,
    billing_cycle: Option<BillingCycle>,
    connection: &Connection,
) -> Result<usize, Error> {
    let dates: Vec<(TransactionId, Date)> = connection
        .prepare(
            "SELECT id, date FROM \"transaction\"
             WHERE account_id = ?1 AND invoice_month_overridden = 0",
        )?
        .query_map(params![account_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut statement =
        connection.prepare("UPDATE \"transaction\" SET invoice_month = ?1 WHERE id = ?2")?;

    for (id, date) in &dates {
        let invoice_month = billing_cycle.map(|cycle| cycle.invoice_month(*date));
        statement.execute(params![invoice_month, id])?;
    }

    Ok(dates.len())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod database_tests {
    use rusqlite::Connection;
    use time::{Month, macros::date};

    use crate::{
        Error,
        account::{AccountType, NewAccount, create_account},
        billing::{BillingCycle, InvoiceMonth},
        db::initialize,
        transaction::{
            Transaction, TransactionType, count_transactions, create_transaction,
            get_transaction, link_transactions, refresh_invoice_months,
        },
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn create_checking_account(conn: &Connection) -> i64 {
        create_account(
            &NewAccount {
                name: "Everyday".to_owned(),
                account_type: AccountType::Checking,
                credit_limit: None,
                billing_cycle: None,
            },
            conn,
        )
        .unwrap()
        .id
    }

    fn create_credit_account(conn: &Connection) -> i64 {
        create_account(
            &NewAccount {
                name: "Visa".to_owned(),
                account_type: AccountType::Credit,
                credit_limit: Some(100_000),
                billing_cycle: Some(BillingCycle::new(20, 10).unwrap()),
            },
            conn,
        )
        .unwrap()
        .id
    }

    #[test]
    fn create_succeeds() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);

        let result = create_transaction(
            &Transaction::build(
                account_id,
                -1230,
                date!(2025 - 10 - 05),
                TransactionType::Expense,
            )
            .description("Coffee"),
            &conn,
        );

        match result {
            Ok(transaction) => {
                assert_eq!(transaction.amount, -1230);
                assert_eq!(transaction.description, "Coffee");
                assert_eq!(transaction.invoice_month, None);
            }
            Err(error) => panic!("Unexpected error: {error}"),
        }
    }

    #[test]
    fn create_fails_on_zero_amount() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);

        let result = create_transaction(
            &Transaction::build(account_id, 0, date!(2025 - 10 - 05), TransactionType::Income),
            &conn,
        );

        assert_eq!(result, Err(Error::ZeroAmount));
    }

    #[test]
    fn create_fails_on_positive_expense() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);

        let result = create_transaction(
            &Transaction::build(
                account_id,
                500,
                date!(2025 - 10 - 05),
                TransactionType::Expense,
            ),
            &conn,
        );

        assert_eq!(
            result,
            Err(Error::SignMismatch {
                transaction_type: "expense".to_owned(),
                amount: 500
            })
        );
    }

    #[test]
    fn create_fails_on_missing_account() {
        let conn = get_test_connection();

        let result = create_transaction(
            &Transaction::build(42, 500, date!(2025 - 10 - 05), TransactionType::Income),
            &conn,
        );

        assert_eq!(result, Err(Error::AccountNotFound(42)));
    }

    #[test]
    fn credit_card_expense_gets_invoice_month() {
        let conn = get_test_connection();
        let account_id = create_credit_account(&conn);

        let transaction = create_transaction(
            &Transaction::build(
                account_id,
                -5_000,
                date!(2025 - 03 - 25),
                TransactionType::Expense,
            ),
            &conn,
        )
        .unwrap();

        assert_eq!(
            transaction.invoice_month,
            Some(InvoiceMonth::new(2025, Month::May))
        );
        assert!(!transaction.invoice_month_overridden);
    }

    #[test]
    fn invoice_month_can_be_overridden() {
        let conn = get_test_connection();
        let account_id = create_credit_account(&conn);
        let june = InvoiceMonth::new(2025, Month::June);

        let transaction = create_transaction(
            &Transaction::build(
                account_id,
                -5_000,
                date!(2025 - 03 - 25),
                TransactionType::Expense,
            )
            .invoice_month(Some(june)),
            &conn,
        )
        .unwrap();

        assert_eq!(transaction.invoice_month, Some(june));
        assert!(transaction.invoice_month_overridden);
    }

    #[test]
    fn create_fails_when_credit_limit_exceeded() {
        let conn = get_test_connection();
        let account_id = create_credit_account(&conn);

        let result = create_transaction(
            &Transaction::build(
                account_id,
                -150_000,
                date!(2025 - 03 - 25),
                TransactionType::Expense,
            ),
            &conn,
        );

        assert_eq!(
            result,
            Err(Error::CreditLimitExceeded {
                limit: 100_000,
                requested: 150_000,
                available: 100_000,
            })
        );
        assert_eq!(count_transactions(&conn), Ok(0));
    }

    #[test]
    fn refresh_keeps_overridden_invoice_months() {
        let conn = get_test_connection();
        let account_id = create_credit_account(&conn);
        let june = InvoiceMonth::new(2025, Month::June);
        let assigned = create_transaction(
            &Transaction::build(
                account_id,
                -5_000,
                date!(2025 - 03 - 15),
                TransactionType::Expense,
            ),
            &conn,
        )
        .unwrap();
        let overridden = create_transaction(
            &Transaction::build(
                account_id,
                -5_000,
                date!(2025 - 03 - 15),
                TransactionType::Expense,
            )
            .invoice_month(Some(june)),
            &conn,
        )
        .unwrap();

        // Closing on the 10th moves a purchase on the 15th to the next cycle.
        let updated =
            refresh_invoice_months(account_id, Some(BillingCycle::new(10, 5).unwrap()), &conn)
                .unwrap();

        assert_eq!(updated, 1);
        assert_eq!(
            get_transaction(assigned.id, &conn).unwrap().invoice_month,
            Some(InvoiceMonth::new(2025, Month::May))
        );
        assert_eq!(
            get_transaction(overridden.id, &conn).unwrap().invoice_month,
            Some(june)
        );
    }

    #[test]
    fn link_sets_both_sides() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);
        let date = date!(2025 - 03 - 15);
        let first = create_transaction(
            &Transaction::build(account_id, -100, date, TransactionType::Transfer),
            &conn,
        )
        .unwrap();
        let second = create_transaction(
            &Transaction::build(account_id, 100, date, TransactionType::Transfer),
            &conn,
        )
        .unwrap();

        link_transactions(first.id, second.id, &conn).unwrap();

        assert_eq!(
            get_transaction(first.id, &conn).unwrap().linked_transaction_id,
            Some(second.id)
        );
        assert_eq!(
            get_transaction(second.id, &conn)
                .unwrap()
                .linked_transaction_id,
            Some(first.id)
        );
    }

    #[test]
    fn get_missing_transaction_names_id() {
        let conn = get_test_connection();

        assert_eq!(
            get_transaction(5, &conn),
            Err(Error::TransactionNotFound(5))
        );
    }
}
