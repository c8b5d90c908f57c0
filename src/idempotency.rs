//! Deduplicates retried mutations by their `Idempotency-Key` header.
//!
//! The response of a mutation sent with a key is stored along with the key in
//! the same unit of work as the mutation itself. A retried send with the same
//! key gets the stored response back instead of applying the mutation twice,
//! which covers clients whose first send succeeded but never saw the reply.

use axum::http::HeaderMap;
use rusqlite::{
    Connection, OptionalExtension, Transaction as SqlTransaction, TransactionBehavior, params,
};
use serde::{Serialize, de::DeserializeOwned};
use time::{OffsetDateTime, UtcOffset};

use crate::{Error, orchestrator::Compensation};

/// The header clients put the idempotency key of a mutation in.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Get the idempotency key from the request headers, if there is a non-blank one.
pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
}

/// Create the idempotency record table in the database.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_idempotency_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS idempotency_record (
            key TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            response TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        (),
    )?;

    Ok(())
}

/// Delete the idempotency records stored before `before`.
///
/// Returns the number of records deleted.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn prune_idempotency_records(
    before: OffsetDateTime,
    connection: &Connection,
) -> Result<usize, Error> {
    connection
        .execute(
            "DELETE FROM idempotency_record WHERE created_at < ?1",
            params![before.to_offset(UtcOffset::UTC)],
        )
        .map_err(|error| error.into())
}

fn find_response<T: DeserializeOwned>(
    key: &str,
    operation: &str,
    connection: &Connection,
) -> Result<Option<T>, Error> {
    let record: Option<(String, String)> = connection
        .query_row(
            "SELECT operation, response FROM idempotency_record WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((stored_operation, response)) = record else {
        return Ok(None);
    };

    if stored_operation != operation {
        return Err(Error::IdempotencyKeyReused {
            key: key.to_owned(),
            operation: stored_operation,
        });
    }

    serde_json::from_str(&response)
        .map(Some)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))
}

fn record_response<T: Serialize>(
    key: &str,
    operation: &str,
    response: &T,
    connection: &Connection,
) -> Result<(), Error> {
    let response = serde_json::to_string(response)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    connection.execute(
        "INSERT INTO idempotency_record (key, operation, response, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![key, operation, response, OffsetDateTime::now_utc()],
    )?;

    Ok(())
}

/// Run the multi-step `operation` at most once per idempotency key.
///
/// Without a key, `steps` always runs. With a key that was seen before, the
/// stored response is returned and `steps` does not run. Otherwise `steps`
/// runs under a [Compensation] log and its response is stored as the final
/// step, so a failure to store it undoes the operation too.
///
/// # Errors
/// Returns [Error::IdempotencyKeyReused] if the key was stored for another
/// operation, otherwise any error from `steps` or from storing the response.
pub fn idempotent<T, F>(
    key: Option<&str>,
    operation: &str,
    connection: &Connection,
    steps: F,
) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut Compensation) -> Result<T, Error>,
{
    if let Some(key) = key
        && let Some(stored) = find_response(key, operation, connection)?
    {
        tracing::info!("Returning the stored response of {operation} for idempotency key {key}");
        return Ok(stored);
    }

    Compensation::execute(operation, connection, |compensation| {
        let response = steps(compensation)?;

        if let Some(key) = key {
            let stored = record_response(key, operation, &response, connection);
            compensation.check("storing the idempotency record", stored)?;
        }

        Ok(response)
    })
}

/// Run the single-step `operation` inside one SQL transaction, at most once
/// per idempotency key.
///
/// The response is stored in the same SQL transaction as the writes of `f`,
/// so either both are committed or neither is.
///
/// # Errors
/// Returns [Error::IdempotencyKeyReused] if the key was stored for another
/// operation, otherwise any error from `f` or from SQLite.
pub fn idempotent_atomic<T, F>(
    key: Option<&str>,
    operation: &str,
    connection: &Connection,
    f: F,
) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&Connection) -> Result<T, Error>,
{
    if let Some(key) = key
        && let Some(stored) = find_response(key, operation, connection)?
    {
        tracing::info!("Returning the stored response of {operation} for idempotency key {key}");
        return Ok(stored);
    }

    let transaction = SqlTransaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    let response = f(&*transaction)?;

    if let Some(key) = key {
        record_response(key, operation, &response, &transaction)?;
    }

    transaction.commit()?;

    Ok(response)
}
