//! Explicit undo logs for multi-step ledger operations.
//!
//! An operation records one [UndoStep] for every write it commits. If a later
//! step fails, the recorded steps are undone newest first and the balances of
//! every touched account are recalculated, so observers never see half an
//! operation.

use rusqlite::{Connection, params};

use crate::{
    Error,
    account::recalculate_balance,
    database_id::{AccountId, TransactionId},
};

/// A write that can be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoStep {
    /// Delete a transaction that was inserted.
    DeleteTransaction(TransactionId),
    /// Delete the journal entries that were inserted for a transaction.
    DeleteJournalEntries(TransactionId),
    /// Delete an account that was created, along with its transactions.
    DeleteAccount(AccountId),
}

impl UndoStep {
    fn undo(&self, connection: &Connection) -> Result<(), Error> {
        // Rows that are already gone count as undone.
        match self {
            UndoStep::DeleteTransaction(id) => {
                connection.execute("DELETE FROM \"transaction\" WHERE id = ?1", params![id])?;
            }
            UndoStep::DeleteJournalEntries(transaction_id) => {
                connection.execute(
                    "DELETE FROM journal_entry WHERE transaction_id = ?1",
                    params![transaction_id],
                )?;
            }
            UndoStep::DeleteAccount(id) => {
                connection.execute("DELETE FROM account WHERE id = ?1", params![id])?;
            }
        }

        Ok(())
    }
}

/// The undo log of one multi-step operation.
#[derive(Debug)]
pub struct Compensation {
    operation: String,
    steps: Vec<UndoStep>,
    accounts: Vec<AccountId>,
}

impl Compensation {
    /// Start an empty undo log for `operation`.
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_owned(),
            steps: Vec::new(),
            accounts: Vec::new(),
        }
    }

    /// Run `steps` as the operation `operation`, undoing its recorded writes if
    /// it fails.
    ///
    /// # Errors
    /// Returns the error from `steps`, or [Error::PartialWrite] if the writes
    /// could not all be undone.
    pub fn execute<T>(
        operation: &str,
        connection: &Connection,
        steps: impl FnOnce(&mut Compensation) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut compensation = Self::new(operation);

        match steps(&mut compensation) {
            Ok(value) => Ok(value),
            Err(error) => Err(compensation.run(connection, error)),
        }
    }

    /// Remember a committed write.
    pub fn record(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    /// Remember that the balance of `account_id` must be recalculated if the
    /// operation is undone.
    pub fn touch(&mut self, account_id: AccountId) {
        if !self.accounts.contains(&account_id) {
            self.accounts.push(account_id);
        }
    }

    /// The transactions committed so far.
    pub fn committed_transactions(&self) -> Vec<TransactionId> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                UndoStep::DeleteTransaction(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Log `result` with the operation and what has been committed if it is
    /// an error, then pass it on.
    pub fn check<T>(&self, step: &str, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(error) = &result {
            tracing::error!(
                operation = %self.operation,
                committed = ?self.committed_transactions(),
                accounts = ?self.accounts,
                "{step} failed: {error}"
            );
        }

        result
    }

    /// Undo the recorded writes newest first and recalculate the touched
    /// balances.
    ///
    /// Returns `cause` if everything was undone, otherwise an
    /// [Error::PartialWrite] listing the transactions that remain.
    pub fn run(self, connection: &Connection, cause: Error) -> Error {
        if self.steps.is_empty() && self.accounts.is_empty() {
            return cause;
        }

        tracing::warn!(
            "Undoing {} step(s) of {} after error: {cause}",
            self.steps.len(),
            self.operation
        );

        let mut undo_failed = false;
        let mut left_behind = Vec::new();

        for step in self.steps.iter().rev() {
            if let Err(error) = step.undo(connection) {
                tracing::error!(
                    operation = %self.operation,
                    "Could not undo {step:?}: {error}"
                );
                undo_failed = true;

                if let UndoStep::DeleteTransaction(id) = step {
                    left_behind.push(*id);
                }
            }
        }

        for &account_id in &self.accounts {
            match recalculate_balance(account_id, connection) {
                Ok(_) | Err(Error::AccountNotFound(_)) => {}
                Err(error) => {
                    tracing::error!(
                        operation = %self.operation,
                        "Could not recalculate the balance of account {account_id}: {error}"
                    );
                    undo_failed = true;
                }
            }
        }

        if undo_failed {
            left_behind.sort_unstable();

            return Error::PartialWrite {
                operation: self.operation,
                committed: left_behind,
                cause: cause.to_string(),
            };
        }

        cause
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        Error,
        account::{AccountType, NewAccount, create_account, get_account, recalculate_balance},
        db::initialize,
        transaction::{
            Transaction, TransactionType, count_transactions, create_transaction,
        },
    };

    use super::{Compensation, UndoStep};

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

    #[test]
    fn failure_undoes_recorded_writes_and_restores_balance() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);

        let result: Result<(), Error> = Compensation::execute("test", &conn, |compensation| {
            let transaction = create_transaction(
                &Transaction::build(
                    account_id,
                    10_000,
                    date!(2025 - 03 - 01),
                    TransactionType::Income,
                ),
                &conn,
            )?;
            compensation.record(UndoStep::DeleteTransaction(transaction.id));
            compensation.touch(account_id);
            recalculate_balance(account_id, &conn)?;

            Err(Error::NotFound)
        });

        assert_eq!(result, Err(Error::NotFound));
        assert_eq!(count_transactions(&conn), Ok(0));
        assert_eq!(get_account(account_id, &conn).unwrap().balance, 0);
    }

    #[test]
    fn failed_undo_reports_partial_write() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);
        conn.execute_batch(
            "CREATE TEMP TRIGGER block_delete BEFORE DELETE ON \"transaction\"
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
        )
        .unwrap();
        let mut committed_id = 0;

        let result: Result<(), Error> = Compensation::execute("test", &conn, |compensation| {
            let transaction = create_transaction(
                &Transaction::build(
                    account_id,
                    10_000,
                    date!(2025 - 03 - 01),
                    TransactionType::Income,
                ),
                &conn,
            )?;
            committed_id = transaction.id;
            compensation.record(UndoStep::DeleteTransaction(transaction.id));

            Err(Error::NotFound)
        });

        assert_eq!(
            result,
            Err(Error::PartialWrite {
                operation: "test".to_owned(),
                committed: vec![committed_id],
                cause: Error::NotFound.to_string(),
            })
        );
    }

    #[test]
    fn success_keeps_writes() {
        let conn = get_test_connection();
        let account_id = create_checking_account(&conn);

        let result = Compensation::execute("test", &conn, |compensation| {
            let transaction = create_transaction(
                &Transaction::build(
                    account_id,
                    10_000,
                    date!(2025 - 03 - 01),
                    TransactionType::Income,
                ),
                &conn,
            )?;
            compensation.record(UndoStep::DeleteTransaction(transaction.id));
            Ok(transaction.id)
        });

        assert!(result.is_ok());
        assert_eq!(count_transactions(&conn), Ok(1));
    }
}
