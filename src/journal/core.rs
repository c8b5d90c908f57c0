//! Double-entry journal entries attached to transactions.

use std::str::FromStr;

use rusqlite::{
    Connection, Row, params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    Error,
    database_id::{JournalEntryId, TransactionId},
    date_format::iso_date,
};

/// Which side of the ledger an entry is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Money flowing into a ledger category.
    Debit,
    /// Money flowing out of a ledger category.
    Credit,
}

impl EntryType {
    fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }
}

impl FromStr for EntryType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryType::Debit),
            "credit" => Ok(EntryType::Credit),
            _ => Err(()),
        }
    }
}

impl ToSql for EntryType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for EntryType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// One leg of a double-entry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// The ID of the entry.
    pub id: JournalEntryId,
    /// The transaction the entry records. Entries without one never balance.
    pub transaction_id: Option<TransactionId>,
    /// Which side of the ledger the entry is on.
    pub entry_type: EntryType,
    /// The non-negative amount in minor units.
    pub amount: i64,
    /// What the entry is for.
    pub description: String,
    /// When the entry was booked.
    #[serde(with = "iso_date")]
    pub entry_date: Date,
    /// The ledger category of the account the entry books against.
    pub ledger_category: Option<String>,
}

/// The data needed to create a [JournalEntry].
#[derive(Debug, Clone, PartialEq)]
pub struct NewJournalEntry {
    /// The transaction the entry records.
    pub transaction_id: Option<TransactionId>,
    /// Which side of the ledger the entry is on.
    pub entry_type: EntryType,
    /// The non-negative amount in minor units.
    pub amount: i64,
    /// What the entry is for.
    pub description: String,
    /// When the entry was booked.
    pub entry_date: Date,
    /// The ledger category of the account the entry books against.
    pub ledger_category: Option<String>,
}

/// A debit and a credit of `amount` for `transaction_id`, which balance by
/// construction.
///
/// Money moves from `credit_category` to `debit_category`.
pub fn balanced_pair(
    transaction_id: TransactionId,
    amount: i64,
    debit_category: &str,
    credit_category: &str,
    description: &str,
    entry_date: Date,
) -> [NewJournalEntry; 2] {
    let entry = |entry_type, category: &str| NewJournalEntry {
        transaction_id: Some(transaction_id),
        entry_type,
        amount,
        description: description.to_owned(),
        entry_date,
        ledger_category: Some(category.to_owned()),
    };

    [
        entry(EntryType::Debit, debit_category),
        entry(EntryType::Credit, credit_category),
    ]
}

/// Create the journal entry and ledger category tables in the database.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_journal_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS journal_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER,
            entry_type TEXT NOT NULL,
            amount INTEGER NOT NULL CHECK (amount >= 0),
            description TEXT NOT NULL,
            entry_date TEXT NOT NULL,
            ledger_category TEXT,
            FOREIGN KEY(transaction_id) REFERENCES \"transaction\"(id) ON DELETE CASCADE
        )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_journal_entry_transaction
         ON journal_entry(transaction_id);",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS ledger_category (
            account_id INTEGER PRIMARY KEY,
            category TEXT NOT NULL,
            FOREIGN KEY(account_id) REFERENCES account(id) ON DELETE CASCADE
        )",
        (),
    )?;

    Ok(())
}

const JOURNAL_ENTRY_COLUMNS: &str =
    "id, transaction_id, entry_type, amount, description, entry_date, ledger_category";

/// Map a database row to a [JournalEntry].
pub fn map_journal_entry_row(row: &Row) -> Result<JournalEntry, rusqlite::Error> {
    Ok(JournalEntry {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        entry_type: row.get(2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        entry_date: row.get(5)?,
        ledger_category: row.get(6)?,
    })
}

/// Write `entry` to the journal.
///
/// # Errors
/// This function will return a:
/// - [Error::NegativeEntryAmount] if the amount is negative,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn insert_journal_entry(
    entry: &NewJournalEntry,
    connection: &Connection,
) -> Result<JournalEntry, Error> {
    if entry.amount < 0 {
        return Err(Error::NegativeEntryAmount(entry.amount));
    }

    let entry = connection
        .prepare(&format!(
            "INSERT INTO journal_entry
                (transaction_id, entry_type, amount, description, entry_date, ledger_category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING {JOURNAL_ENTRY_COLUMNS}"
        ))?
        .query_row(
            params![
                entry.transaction_id,
                entry.entry_type,
                entry.amount,
                entry.description,
                entry.entry_date,
                entry.ledger_category,
            ],
            map_journal_entry_row,
        )?;

    Ok(entry)
}

/// Retrieve every journal entry ordered by ID.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_journal_entries(connection: &Connection) -> Result<Vec<JournalEntry>, Error> {
    connection
        .prepare(&format!(
            "SELECT {JOURNAL_ENTRY_COLUMNS} FROM journal_entry ORDER BY id ASC"
        ))?
        .query_map([], map_journal_entry_row)?
        .map(|maybe_entry| maybe_entry.map_err(|error| error.into()))
        .collect()
}

/// Retrieve the journal entries of `transaction_id` ordered by ID.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_transaction_entries(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Vec<JournalEntry>, Error> {
    connection
        .prepare(&format!(
            "SELECT {JOURNAL_ENTRY_COLUMNS} FROM journal_entry
             WHERE transaction_id = ?1 ORDER BY id ASC"
        ))?
        .query_map(params![transaction_id], map_journal_entry_row)?
        .map(|maybe_entry| maybe_entry.map_err(|error| error.into()))
        .collect()
}

/// Set the amount and date of every journal entry of `transaction_ids`.
///
/// Returns the number of entries that were changed.
///
/// # Errors
/// This function will return a:
/// - [Error::NegativeEntryAmount] if the amount is negative,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn restate_journal_entries(
    transaction_ids: &[TransactionId],
    amount: i64,
    entry_date: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    if amount < 0 {
        return Err(Error::NegativeEntryAmount(amount));
    }

    let mut statement = connection.prepare(
        "UPDATE journal_entry SET amount = ?1, entry_date = ?2 WHERE transaction_id = ?3",
    )?;

    let mut rows_affected = 0;
    for transaction_id in transaction_ids {
        rows_affected += statement.execute(params![amount, entry_date, transaction_id])?;
    }

    Ok(rows_affected)
}
