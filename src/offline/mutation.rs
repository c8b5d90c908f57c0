//! The operations the offline queue holds and what the server answers with.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    account::{AccountEdit, AccountResponse, DeleteAccountResponse},
    database_id::{AccountId, TransactionId},
    offline::QueueError,
    orchestrator::{AccountImport, ImportAccountsResponse, PairedTransaction, TransferRequest},
    transaction::{
        CreateTransactionResponse, DeleteTransactionResponse, EditTransactionResponse,
        TransactionBuilder, TransactionEdit,
    },
};

/// A transaction that already exists on the server, or one that will be
/// created by an earlier queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionRef {
    /// A transaction with a server ID.
    Server(TransactionId),
    /// The transaction created by the queued `create_transaction` mutation with this key.
    Local(Uuid),
}

impl TransactionRef {
    fn resolve(
        self,
        lookup: impl FnOnce(Uuid) -> Result<Option<TransactionId>, QueueError>,
    ) -> Result<Option<TransactionId>, QueueError> {
        match self {
            TransactionRef::Server(id) => Ok(Some(id)),
            TransactionRef::Local(key) => lookup(key),
        }
    }
}

/// An operation made while offline, stored as `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Mutation {
    /// Create a transaction.
    CreateTransaction(TransactionBuilder),
    /// Edit a transaction.
    EditTransaction {
        /// The transaction to edit.
        transaction: TransactionRef,
        /// The changes.
        edit: TransactionEdit,
    },
    /// Delete a transaction and its linked partner.
    DeleteTransaction {
        /// The transaction to delete.
        transaction: TransactionRef,
    },
    /// Move money between accounts.
    Transfer(TransferRequest),
    /// Change the settings of an account.
    EditAccount {
        /// The account to edit.
        account_id: AccountId,
        /// The new settings.
        edit: AccountEdit,
    },
    /// Delete an account and its transactions.
    DeleteAccount {
        /// The account to delete.
        account_id: AccountId,
    },
    /// Create accounts with opening balances.
    ImportAccounts(AccountImport),
}

impl Mutation {
    /// The name of the operation, e.g. "create_transaction".
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateTransaction(_) => "create_transaction",
            Mutation::EditTransaction { .. } => "edit_transaction",
            Mutation::DeleteTransaction { .. } => "delete_transaction",
            Mutation::Transfer(_) => "transfer",
            Mutation::EditAccount { .. } => "edit_account",
            Mutation::DeleteAccount { .. } => "delete_account",
            Mutation::ImportAccounts(_) => "import_accounts",
        }
    }

    /// The queued mutation this mutation depends on, if any.
    pub fn local_reference(&self) -> Option<Uuid> {
        match self {
            Mutation::EditTransaction {
                transaction: TransactionRef::Local(key),
                ..
            }
            | Mutation::DeleteTransaction {
                transaction: TransactionRef::Local(key),
            } => Some(*key),
            _ => None,
        }
    }

    /// Turn the mutation into a server request, looking up local references
    /// with `lookup`.
    ///
    /// Returns `None` if a local reference has not been resolved, i.e. the
    /// mutation that creates the transaction has not synced.
    ///
    /// # Errors
    /// Returns the errors of `lookup`.
    pub fn resolve(
        &self,
        lookup: impl FnOnce(Uuid) -> Result<Option<TransactionId>, QueueError>,
    ) -> Result<Option<ServerRequest>, QueueError> {
        let request = match self {
            Mutation::CreateTransaction(builder) => ServerRequest::CreateTransaction(builder.clone()),
            Mutation::EditTransaction { transaction, edit } => {
                let Some(transaction_id) = transaction.resolve(lookup)? else {
                    return Ok(None);
                };

                ServerRequest::EditTransaction {
                    transaction_id,
                    edit: edit.clone(),
                }
            }
            Mutation::DeleteTransaction { transaction } => {
                let Some(transaction_id) = transaction.resolve(lookup)? else {
                    return Ok(None);
                };

                ServerRequest::DeleteTransaction { transaction_id }
            }
            Mutation::Transfer(request) => ServerRequest::Transfer(request.clone()),
            Mutation::EditAccount { account_id, edit } => ServerRequest::EditAccount {
                account_id: *account_id,
                edit: edit.clone(),
            },
            Mutation::DeleteAccount { account_id } => ServerRequest::DeleteAccount {
                account_id: *account_id,
            },
            Mutation::ImportAccounts(import) => ServerRequest::ImportAccounts(import.clone()),
        };

        Ok(Some(request))
    }
}

/// A mutation with every transaction reference resolved to a server ID.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerRequest {
    /// `POST /api/transactions`
    CreateTransaction(TransactionBuilder),
    /// `PUT /api/transactions/{transaction_id}`
    EditTransaction {
        /// The transaction to edit.
        transaction_id: TransactionId,
        /// The changes.
        edit: TransactionEdit,
    },
    /// `DELETE /api/transactions/{transaction_id}`
    DeleteTransaction {
        /// The transaction to delete.
        transaction_id: TransactionId,
    },
    /// `POST /api/transfers`
    Transfer(TransferRequest),
    /// `PUT /api/accounts/{account_id}`
    EditAccount {
        /// The account to edit.
        account_id: AccountId,
        /// The new settings.
        edit: AccountEdit,
    },
    /// `DELETE /api/accounts/{account_id}`
    DeleteAccount {
        /// The account to delete.
        account_id: AccountId,
    },
    /// `POST /api/accounts/import`
    ImportAccounts(AccountImport),
}

/// The server's authoritative answer to a [ServerRequest].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEffect {
    /// The created transaction and its account balance.
    TransactionCreated(CreateTransactionResponse),
    /// The edited transaction and the balances it changed.
    TransactionEdited(EditTransactionResponse),
    /// The deleted transactions and the balances they changed.
    TransactionsDeleted(DeleteTransactionResponse),
    /// Both halves of a transfer and both balances.
    Transferred(PairedTransaction),
    /// The edited account.
    AccountEdited(AccountResponse),
    /// The deleted account.
    AccountDeleted(DeleteAccountResponse),
    /// The imported accounts.
    AccountsImported(ImportAccountsResponse),
}

/// Where a queued mutation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting to be sent, possibly after failed attempts.
    Pending,
    /// Accepted by the server. Kept until pruned so the key is not queued again.
    Synced,
    /// Rejected by the server or out of attempts. Kept so the user can see it.
    Failed,
}

impl MutationStatus {
    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Synced => "synced",
            MutationStatus::Failed => "failed",
        }
    }
}

impl Display for MutationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MutationStatus::Pending),
            "synced" => Ok(MutationStatus::Synced),
            "failed" => Ok(MutationStatus::Failed),
            _ => Err(()),
        }
    }
}

impl ToSql for MutationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MutationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// A mutation waiting in the offline queue.
///
/// Serializes as `{ id, type, data, attempts, created_at, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// The key the mutation is sent with, generated on the client.
    pub id: Uuid,
    /// The operation.
    #[serde(flatten)]
    pub mutation: Mutation,
    /// How many times the mutation has been sent.
    pub attempts: u32,
    /// When the mutation was queued.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Where the mutation is in its lifecycle.
    pub status: MutationStatus,
    /// Why the last send failed.
    #[serde(default)]
    pub last_error: Option<String>,
    /// The earliest time the mutation may be sent again after a failed send.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    /// When the server accepted the mutation.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
    /// The position in the queue. Later mutations have larger numbers.
    #[serde(default)]
    pub sequence: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::{date, datetime};
    use uuid::Uuid;

    use crate::{
        offline::QueueError,
        transaction::{Transaction, TransactionEdit, TransactionType},
    };

    use super::{Mutation, MutationStatus, PendingMutation, ServerRequest, TransactionRef};

    #[test]
    fn persisted_record_has_type_and_data() {
        let id = Uuid::new_v4();
        let entry = PendingMutation {
            id,
            mutation: Mutation::DeleteAccount { account_id: 3 },
            attempts: 0,
            created_at: datetime!(2025-03-01 12:00 UTC),
            status: MutationStatus::Pending,
            last_error: None,
            next_attempt_at: None,
            synced_at: None,
            sequence: 1,
        };

        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["id"], json!(id.to_string()));
        assert_eq!(value["type"], json!("delete_account"));
        assert_eq!(value["data"], json!({ "account_id": 3 }));
        assert_eq!(value["attempts"], json!(0));
        assert_eq!(value["created_at"], json!("2025-03-01T12:00:00Z"));
    }

    #[test]
    fn mutation_survives_json() {
        let mutation = Mutation::CreateTransaction(
            Transaction::build(1, -500, date!(2025 - 03 - 01), TransactionType::Expense)
                .description("Coffee"),
        );

        let json = serde_json::to_string(&mutation).unwrap();

        assert_eq!(serde_json::from_str::<Mutation>(&json).unwrap(), mutation);
    }

    #[test]
    fn local_reference_resolves_through_lookup() {
        let key = Uuid::new_v4();
        let mutation = Mutation::DeleteTransaction {
            transaction: TransactionRef::Local(key),
        };

        let resolved = mutation
            .resolve(|local| {
                assert_eq!(local, key);
                Ok(Some(42))
            })
            .unwrap();

        assert_eq!(mutation.local_reference(), Some(key));
        assert_eq!(
            resolved,
            Some(ServerRequest::DeleteTransaction { transaction_id: 42 })
        );
    }

    #[test]
    fn unresolved_reference_gives_none() {
        let mutation = Mutation::EditTransaction {
            transaction: TransactionRef::Local(Uuid::new_v4()),
            edit: TransactionEdit::default(),
        };

        let resolved = mutation.resolve(|_| Ok::<_, QueueError>(None)).unwrap();

        assert_eq!(resolved, None);
    }

    #[test]
    fn server_reference_skips_lookup() {
        let mutation = Mutation::DeleteTransaction {
            transaction: TransactionRef::Server(7),
        };

        let resolved = mutation
            .resolve(|_| panic!("server references need no lookup"))
            .unwrap();

        assert_eq!(
            resolved,
            Some(ServerRequest::DeleteTransaction { transaction_id: 7 })
        );
    }
}
