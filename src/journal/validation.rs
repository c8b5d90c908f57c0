//! Detects journal entries that do not balance.
//!
//! The check only reports problems after the fact. Writes are kept balanced
//! by the orchestrator, which only ever inserts entries in balanced pairs.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    database_id::TransactionId,
    journal::{EntryType, JournalEntry, get_journal_entries},
};

/// The smallest difference between debits and credits that counts as unbalanced.
pub const TOLERANCE: i64 = 1;

/// The totals of a transaction whose journal entries do not balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbalancedTransaction {
    /// The transaction, or `None` for entries not attached to any transaction.
    pub transaction_id: Option<TransactionId>,
    /// The sum of the debit entries, clamped to the range of an `i64`.
    pub total_debits: i64,
    /// The sum of the credit entries, clamped to the range of an `i64`.
    pub total_credits: i64,
    /// The absolute difference between debits and credits, clamped to the
    /// range of an `i64`.
    pub difference: i64,
}

/// Group `entries` by transaction and return the groups whose debits and
/// credits differ by at least [TOLERANCE].
///
/// Entries without a transaction are always reported. An empty result means
/// every transaction balances. Groups are ordered by transaction ID, with the
/// unattached group first.
pub fn validate(entries: &[JournalEntry]) -> Vec<UnbalancedTransaction> {
    // Wide enough that summing i64 amounts cannot overflow.
    let mut totals: BTreeMap<Option<TransactionId>, (i128, i128)> = BTreeMap::new();

    for entry in entries {
        let (debits, credits) = totals.entry(entry.transaction_id).or_default();

        match entry.entry_type {
            EntryType::Debit => *debits += i128::from(entry.amount),
            EntryType::Credit => *credits += i128::from(entry.amount),
        }
    }

    totals
        .into_iter()
        .filter_map(|(transaction_id, (total_debits, total_credits))| {
            let difference = (total_debits - total_credits).abs();

            (transaction_id.is_none() || difference >= i128::from(TOLERANCE)).then(|| {
                UnbalancedTransaction {
                    transaction_id,
                    total_debits: saturate(total_debits),
                    total_credits: saturate(total_credits),
                    difference: saturate(difference),
                }
            })
        })
        .collect()
}

/// Clamp a total to the range of the reported fields.
fn saturate(total: i128) -> i64 {
    i64::try_from(total).unwrap_or(if total < 0 { i64::MIN } else { i64::MAX })
}

/// Run [validate] over every journal entry in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn find_unbalanced_transactions(
    connection: &Connection,
) -> Result<Vec<UnbalancedTransaction>, Error> {
    let entries = get_journal_entries(connection)?;

    Ok(validate(&entries))
}

/// The state needed to check the journal.
#[derive(Debug, Clone)]
pub struct UnbalancedState {
    /// The database connection for reading the journal.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for UnbalancedState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The response listing unbalanced transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbalancedResponse {
    /// The transactions whose journal entries do not balance.
    pub unbalanced: Vec<UnbalancedTransaction>,
}

/// A route handler that reports the transactions whose journal entries do not balance.
pub async fn get_unbalanced_endpoint(State(state): State<UnbalancedState>) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    match find_unbalanced_transactions(&connection) {
        Ok(unbalanced) => {
            if !unbalanced.is_empty() {
                tracing::warn!("Found {} unbalanced transaction(s)", unbalanced.len());
            }

            Json(UnbalancedResponse { unbalanced }).into_response()
        }
        Err(error) => {
            tracing::error!("Could not validate the journal: {error}");
            error.into_response()
        }
    }
}
