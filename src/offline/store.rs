//! SQLite storage for the offline queue.

use std::path::Path;

use rusqlite::{
    Connection, OptionalExtension, Row, Transaction as SqlTransaction, TransactionBehavior,
    params,
};
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    database_id::TransactionId,
    offline::{
        QueueError,
        mutation::{Mutation, MutationStatus, PendingMutation},
    },
};

/// The durable half of the offline queue.
///
/// Entries are kept in `pending_mutation` in queue order, and the server IDs of
/// transactions created by synced entries are kept in `resolved_reference` so
/// later entries can still refer to them after a restart. Synced entries stay
/// in the table until [QueueStore::prune_synced] removes them.
#[derive(Debug)]
pub struct QueueStore {
    connection: Connection,
}

const PENDING_MUTATION_COLUMNS: &str =
    "seq, id, type, data, attempts, status, created_at, last_error, next_attempt_at, synced_at";

impl QueueStore {
    /// Open the queue stored in the SQLite database at `path`, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::new(Connection::open(path)?)
    }

    /// Open a queue that only lives as long as the store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn open_in_memory() -> Result<Self, QueueError> {
        Self::new(Connection::open_in_memory()?)
    }

    fn new(connection: Connection) -> Result<Self, QueueError> {
        let transaction =
            SqlTransaction::new_unchecked(&connection, TransactionBehavior::Exclusive)?;

        transaction.execute(
            "CREATE TABLE IF NOT EXISTS pending_mutation (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_error TEXT,
                next_attempt_at TEXT,
                synced_at TEXT
            )",
            (),
        )?;

        transaction.execute(
            "CREATE TABLE IF NOT EXISTS resolved_reference (
                local_key TEXT PRIMARY KEY,
                transaction_id INTEGER NOT NULL
            )",
            (),
        )?;

        transaction.commit()?;

        Ok(Self { connection })
    }

    /// Add `mutation` to the tail of the queue under the key `id`.
    ///
    /// # Errors
    /// Returns an error if the key is already queued or there is an SQL error.
    pub fn insert(
        &self,
        id: Uuid,
        mutation: &Mutation,
        created_at: OffsetDateTime,
    ) -> Result<PendingMutation, QueueError> {
        let (kind, data) = split_mutation(mutation)?;

        self.connection
            .prepare(&format!(
                "INSERT INTO pending_mutation (id, type, data, attempts, status, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)
                 RETURNING {PENDING_MUTATION_COLUMNS}"
            ))?
            .query_row(
                params![
                    id.to_string(),
                    kind,
                    data,
                    MutationStatus::Pending,
                    created_at
                ],
                map_pending_mutation_row,
            )?
    }

    /// Get the queued mutation with the key `id`.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error or the stored mutation is invalid.
    pub fn get(&self, id: Uuid) -> Result<Option<PendingMutation>, QueueError> {
        self.connection
            .prepare(&format!(
                "SELECT {PENDING_MUTATION_COLUMNS} FROM pending_mutation WHERE id = ?1"
            ))?
            .query_row(params![id.to_string()], map_pending_mutation_row)
            .optional()?
            .transpose()
    }

    /// The mutations with `status` in queue order.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error or a stored mutation is invalid.
    pub fn with_status(&self, status: MutationStatus) -> Result<Vec<PendingMutation>, QueueError> {
        self.connection
            .prepare(&format!(
                "SELECT {PENDING_MUTATION_COLUMNS} FROM pending_mutation
                 WHERE status = ?1 ORDER BY seq ASC"
            ))?
            .query_map(params![status], map_pending_mutation_row)?
            .map(|maybe_entry| maybe_entry?)
            .collect()
    }

    /// Count one more send of the mutation `id`, returning the new count.
    ///
    /// # Errors
    /// Returns [QueueError::NotFound] if the mutation is not queued.
    pub fn record_attempt(&self, id: Uuid) -> Result<u32, QueueError> {
        self.connection
            .query_row(
                "UPDATE pending_mutation SET attempts = attempts + 1 WHERE id = ?1
                 RETURNING attempts",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(QueueError::NotFound(id))
    }

    /// Keep the mutation `id` pending but hold it back until `next_attempt_at`.
    ///
    /// # Errors
    /// Returns [QueueError::NotFound] if the mutation is not queued.
    pub fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: OffsetDateTime,
    ) -> Result<(), QueueError> {
        let rows_affected = self.connection.execute(
            "UPDATE pending_mutation SET last_error = ?1, next_attempt_at = ?2 WHERE id = ?3",
            params![error, next_attempt_at, id.to_string()],
        )?;

        if rows_affected == 0 {
            return Err(QueueError::NotFound(id));
        }

        Ok(())
    }

    /// Mark the mutation `id` as failed because of `error`.
    ///
    /// # Errors
    /// Returns [QueueError::NotFound] if the mutation is not queued.
    pub fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), QueueError> {
        let rows_affected = self.connection.execute(
            "UPDATE pending_mutation
             SET status = ?1, last_error = ?2, next_attempt_at = NULL
             WHERE id = ?3",
            params![MutationStatus::Failed, error, id.to_string()],
        )?;

        if rows_affected == 0 {
            return Err(QueueError::NotFound(id));
        }

        Ok(())
    }

    /// Mark the mutation `id` as accepted by the server at `synced_at`.
    ///
    /// # Errors
    /// Returns [QueueError::NotFound] if the mutation is not queued.
    pub fn mark_synced(&self, id: Uuid, synced_at: OffsetDateTime) -> Result<(), QueueError> {
        let rows_affected = self.connection.execute(
            "UPDATE pending_mutation
             SET status = ?1, synced_at = ?2, last_error = NULL, next_attempt_at = NULL
             WHERE id = ?3",
            params![MutationStatus::Synced, synced_at, id.to_string()],
        )?;

        if rows_affected == 0 {
            return Err(QueueError::NotFound(id));
        }

        Ok(())
    }

    /// Delete the entries that synced before `before`, and the resolved
    /// references no pending entry can still use.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error.
    pub fn prune_synced(&self, before: OffsetDateTime) -> Result<usize, QueueError> {
        let transaction =
            SqlTransaction::new_unchecked(&self.connection, TransactionBehavior::Immediate)?;

        let pruned = transaction.execute(
            "DELETE FROM pending_mutation WHERE status = ?1 AND synced_at < ?2",
            params![MutationStatus::Synced, before],
        )?;

        transaction.execute(
            "DELETE FROM resolved_reference
             WHERE NOT EXISTS (
                 SELECT 1 FROM pending_mutation WHERE id = resolved_reference.local_key
             )
             AND NOT EXISTS (
                 SELECT 1 FROM pending_mutation
                 WHERE status != ?1 AND instr(data, resolved_reference.local_key) > 0
             )",
            params![MutationStatus::Synced],
        )?;

        transaction.commit()?;

        Ok(pruned)
    }

    /// Move the mutation `id` to the tail of the queue as a fresh pending
    /// entry with the same key.
    ///
    /// # Errors
    /// Returns [QueueError::NotFound] if the mutation is not queued.
    pub fn requeue(&self, id: Uuid) -> Result<PendingMutation, QueueError> {
        let transaction =
            SqlTransaction::new_unchecked(&self.connection, TransactionBehavior::Immediate)?;

        let Some((kind, data, created_at)) = transaction
            .query_row(
                "DELETE FROM pending_mutation WHERE id = ?1 RETURNING type, data, created_at",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, OffsetDateTime>(2)?,
                    ))
                },
            )
            .optional()?
        else {
            return Err(QueueError::NotFound(id));
        };

        let entry = transaction
            .prepare(&format!(
                "INSERT INTO pending_mutation (id, type, data, attempts, status, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)
                 RETURNING {PENDING_MUTATION_COLUMNS}"
            ))?
            .query_row(
                params![id.to_string(), kind, data, MutationStatus::Pending, created_at],
                map_pending_mutation_row,
            )??;

        transaction.commit()?;

        Ok(entry)
    }

    /// Remove the mutation `id` from the queue.
    ///
    /// # Errors
    /// Returns [QueueError::NotFound] if the mutation is not queued.
    pub fn remove(&self, id: Uuid) -> Result<(), QueueError> {
        let rows_affected = self.connection.execute(
            "DELETE FROM pending_mutation WHERE id = ?1",
            params![id.to_string()],
        )?;

        if rows_affected == 0 {
            return Err(QueueError::NotFound(id));
        }

        Ok(())
    }

    /// Remember that the mutation `local_key` created the transaction `transaction_id`.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error.
    pub fn resolve_reference(
        &self,
        local_key: Uuid,
        transaction_id: TransactionId,
    ) -> Result<(), QueueError> {
        self.connection.execute(
            "INSERT INTO resolved_reference (local_key, transaction_id) VALUES (?1, ?2)
             ON CONFLICT(local_key) DO UPDATE SET transaction_id = excluded.transaction_id",
            params![local_key.to_string(), transaction_id],
        )?;

        Ok(())
    }

    /// The server ID of the transaction created by the mutation `local_key`,
    /// if it has synced.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error.
    pub fn resolved_reference(&self, local_key: Uuid) -> Result<Option<TransactionId>, QueueError> {
        self.connection
            .query_row(
                "SELECT transaction_id FROM resolved_reference WHERE local_key = ?1",
                params![local_key.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(QueueError::from)
    }
}

/// Split a mutation into the `type` and `data` columns.
fn split_mutation(mutation: &Mutation) -> Result<(String, String), QueueError> {
    let mut value = serde_json::to_value(mutation)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| QueueError::Serialization("mutation has no type".to_owned()))?;
    let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);

    Ok((kind, serde_json::to_string(&data)?))
}

fn join_mutation(kind: &str, data: &str) -> Result<Mutation, QueueError> {
    let data: Value = serde_json::from_str(data)?;

    Ok(serde_json::from_value(json!({ "type": kind, "data": data }))?)
}

/// Map a row to a [PendingMutation].
///
/// The outer result is the SQL error, the inner result is a stored mutation
/// that cannot be read back.
fn map_pending_mutation_row(
    row: &Row,
) -> Result<Result<PendingMutation, QueueError>, rusqlite::Error> {
    let id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let data: String = row.get(3)?;

    let id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(error) => return Ok(Err(QueueError::Serialization(error.to_string()))),
    };

    let mutation = match join_mutation(&kind, &data) {
        Ok(mutation) => mutation,
        Err(error) => return Ok(Err(error)),
    };

    Ok(Ok(PendingMutation {
        id,
        mutation,
        attempts: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        last_error: row.get(7)?,
        next_attempt_at: row.get(8)?,
        synced_at: row.get(9)?,
        sequence: row.get(0)?,
    }))
}
