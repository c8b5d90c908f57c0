//! The client's copy of the ledger.

use std::collections::BTreeMap;

use crate::{
    account::{Account, AccountBalance},
    database_id::{AccountId, TransactionId},
    offline::mutation::ServerEffect,
    transaction::Transaction,
};

/// The accounts, balances and transactions the client knows about.
///
/// Only ever updated from the server's responses, never from what the client
/// guessed the result of a mutation would be.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalLedger {
    accounts: BTreeMap<AccountId, Account>,
    balances: BTreeMap<AccountId, i64>,
    transactions: BTreeMap<TransactionId, Transaction>,
}

impl LocalLedger {
    /// Merge the server's answer to a replayed mutation into the local state.
    pub fn apply(&mut self, effect: &ServerEffect) {
        match effect {
            ServerEffect::TransactionCreated(created) => {
                self.set_balance(created.transaction.account_id, created.balance);
                self.insert_transaction(created.transaction.clone());
            }
            ServerEffect::TransactionEdited(edited) => {
                self.insert_transaction(edited.transaction.clone());
                self.set_balances(&edited.balances);
            }
            ServerEffect::TransactionsDeleted(deleted) => {
                for id in &deleted.deleted_ids {
                    self.transactions.remove(id);
                }
                self.set_balances(&deleted.balances);
            }
            ServerEffect::Transferred(paired) => {
                self.set_balance(paired.debit_tx.account_id, paired.debit_balance);
                self.set_balance(paired.credit_tx.account_id, paired.credit_balance);
                self.insert_transaction(paired.debit_tx.clone());
                self.insert_transaction(paired.credit_tx.clone());
            }
            ServerEffect::AccountEdited(edited) => self.insert_account(edited.account.clone()),
            ServerEffect::AccountDeleted(deleted) => self.remove_account(deleted.account_id),
            ServerEffect::AccountsImported(imported) => {
                for account in &imported.accounts {
                    self.insert_account(account.clone());
                }
            }
        }
    }

    /// The last balance the server reported for `account_id`.
    pub fn balance(&self, account_id: AccountId) -> Option<i64> {
        self.balances.get(&account_id).copied()
    }

    /// The account with `account_id`, if the server has sent it.
    pub fn account(&self, account_id: AccountId) -> Option<&Account> {
        self.accounts.get(&account_id)
    }

    /// The transaction with `transaction_id`, if the server has sent it.
    pub fn transaction(&self, transaction_id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&transaction_id)
    }

    /// All known transactions, ordered by ID.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    fn insert_account(&mut self, account: Account) {
        self.balances.insert(account.id, account.balance);
        self.accounts.insert(account.id, account);
    }

    fn insert_transaction(&mut self, transaction: Transaction) {
        self.transactions.insert(transaction.id, transaction);
    }

    fn set_balance(&mut self, account_id: AccountId, balance: i64) {
        self.balances.insert(account_id, balance);

        if let Some(account) = self.accounts.get_mut(&account_id) {
            account.balance = balance;
        }
    }

    fn set_balances(&mut self, balances: &[AccountBalance]) {
        for AccountBalance {
            account_id,
            balance,
        } in balances
        {
            self.set_balance(*account_id, *balance);
        }
    }

    fn remove_account(&mut self, account_id: AccountId) {
        self.accounts.remove(&account_id);
        self.balances.remove(&account_id);
        self.transactions
            .retain(|_, transaction| transaction.account_id != account_id);

        // The server unlinks the partners of the deleted transactions.
        let remaining: Vec<TransactionId> = self.transactions.keys().copied().collect();
        for transaction in self.transactions.values_mut() {
            if transaction
                .linked_transaction_id
                .is_some_and(|linked| !remaining.contains(&linked))
            {
                transaction.linked_transaction_id = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use crate::{
        account::{Account, AccountBalance, AccountType, DeleteAccountResponse},
        offline::mutation::ServerEffect,
        orchestrator::PairedTransaction,
        transaction::{
            CreateTransactionResponse, DeleteTransactionResponse, Transaction, TransactionStatus,
            TransactionType,
        },
    };

    use super::LocalLedger;

    fn transaction(id: i64, account_id: i64, amount: i64) -> Transaction {
        Transaction {
            id,
            description: String::new(),
            amount,
            date: date!(2025 - 03 - 01),
            transaction_type: TransactionType::Transfer,
            status: TransactionStatus::Completed,
            account_id,
            category_id: None,
            invoice_month: None,
            invoice_month_overridden: false,
            parent_transaction_id: None,
            installments: None,
            current_installment: None,
            linked_transaction_id: None,
            recurrence: None,
        }
    }

    fn transfer(debit_id: i64, credit_id: i64) -> PairedTransaction {
        let mut debit_tx = transaction(debit_id, 1, -300);
        let mut credit_tx = transaction(credit_id, 2, 300);
        debit_tx.linked_transaction_id = Some(credit_id);
        credit_tx.linked_transaction_id = Some(debit_id);

        PairedTransaction {
            debit_tx,
            credit_tx,
            debit_balance: -300,
            credit_balance: 300,
            success: true,
        }
    }

    #[test]
    fn balances_come_from_server() {
        let mut ledger = LocalLedger::default();

        ledger.apply(&ServerEffect::TransactionCreated(CreateTransactionResponse {
            transaction: transaction(1, 1, 500),
            balance: 500,
        }));
        ledger.apply(&ServerEffect::TransactionsDeleted(DeleteTransactionResponse {
            deleted_ids: vec![1],
            balances: vec![AccountBalance {
                account_id: 1,
                balance: 0,
            }],
        }));

        assert_eq!(ledger.balance(1), Some(0));
        assert!(ledger.transaction(1).is_none());
    }

    #[test]
    fn transfer_updates_both_accounts() {
        let mut ledger = LocalLedger::default();

        ledger.apply(&ServerEffect::Transferred(transfer(10, 11)));

        assert_eq!(ledger.balance(1), Some(-300));
        assert_eq!(ledger.balance(2), Some(300));
        assert_eq!(
            ledger.transaction(10).and_then(|t| t.linked_transaction_id),
            Some(11)
        );
    }

    #[test]
    fn deleting_account_drops_its_transactions_and_links() {
        let mut ledger = LocalLedger::default();
        ledger.apply(&ServerEffect::AccountEdited(
            crate::account::AccountResponse {
                account: Account {
                    id: 1,
                    name: "Everyday".to_owned(),
                    account_type: AccountType::Checking,
                    balance: 0,
                    credit_limit: None,
                    billing_cycle: None,
                },
            },
        ));
        ledger.apply(&ServerEffect::Transferred(transfer(10, 11)));

        ledger.apply(&ServerEffect::AccountDeleted(DeleteAccountResponse {
            account_id: 1,
        }));

        assert!(ledger.account(1).is_none());
        assert_eq!(ledger.balance(1), None);
        assert!(ledger.transaction(10).is_none());
        assert_eq!(
            ledger.transaction(11).map(|t| t.linked_transaction_id),
            Some(None)
        );
        assert_eq!(ledger.transactions().count(), 1);
    }
}
