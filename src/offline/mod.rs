//! The offline client: a durable queue of mutations made while offline that is
//! replayed against the server, in order and at most once, on reconnect.
//!
//! - [Mutation] and [PendingMutation] are the queued operations.
//! - [QueueStore] persists the queue in SQLite so it survives restarts.
//! - [OfflineQueue] enqueues, cancels and replays entries.
//! - [LedgerApi] is the server the queue replays against, [HttpLedgerApi] is
//!   its HTTP implementation.
//! - [LocalLedger] is the client's view of the ledger, updated from the
//!   server's responses.

use uuid::Uuid;

mod local_state;
mod mutation;
mod queue;
mod remote;
mod store;

pub use local_state::LocalLedger;
pub use mutation::{
    Mutation, MutationStatus, PendingMutation, ServerEffect, ServerRequest, TransactionRef,
};
pub use queue::{OfflineQueue, ReplayHalt, ReplayReport};
pub use remote::{HttpLedgerApi, LedgerApi, RemoteError};
pub use store::QueueStore;

/// The errors of the offline queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue could not be read from or written to local storage.
    #[error("local storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A queued mutation could not be converted to or from JSON.
    #[error("could not serialize mutation: {0}")]
    Serialization(String),

    /// There is no queued mutation with the ID.
    #[error("no queued mutation with the ID {0}")]
    NotFound(Uuid),

    /// The mutation has been sent at least once, so it cannot be cancelled.
    #[error("mutation {0} has already been sent and cannot be cancelled")]
    NotCancellable(Uuid),

    /// Only failed mutations can be retried.
    #[error("mutation {0} has not failed")]
    NotFailed(Uuid),
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        QueueError::Serialization(value.to_string())
    }
}
