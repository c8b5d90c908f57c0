//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use crate::{
    Error, config::LedgerConfig, db::initialize, idempotency::prune_idempotency_records,
};

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Settings for interpreting requests, e.g. the local timezone.
    pub config: LedgerConfig,

    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models
    /// and prune idempotency records older than `config.idempotency_retention_days`.
    /// `config.local_timezone` should be a valid, canonical timezone name, e.g. "Pacific/Auckland".
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(db_connection: Connection, config: LedgerConfig) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let state = Self {
            config,
            db_connection: Arc::new(Mutex::new(db_connection)),
        };
        state.prune_idempotency_records()?;

        Ok(state)
    }

    /// Delete the idempotency records that are past the retention period.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    /// Returns an error if the database lock is poisoned or there is an SQL error.
    pub fn prune_idempotency_records(&self) -> Result<usize, Error> {
        let before = OffsetDateTime::now_utc()
            - Duration::days(i64::from(self.config.idempotency_retention_days));
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        let pruned = prune_idempotency_records(before, &connection)?;
        if pruned > 0 {
            tracing::info!("Pruned {pruned} idempotency records stored before {before}");
        }

        Ok(pruned)
    }
}
