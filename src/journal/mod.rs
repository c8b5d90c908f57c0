mod chart;
mod core;
mod validation;

pub use chart::{ChartOfAccounts, set_ledger_category, set_ledger_category_endpoint};
pub use core::{
    EntryType, JournalEntry, NewJournalEntry, balanced_pair, create_journal_tables,
    get_journal_entries, get_transaction_entries, insert_journal_entry, restate_journal_entries,
};
pub use validation::{
    TOLERANCE, UnbalancedTransaction, find_unbalanced_transactions, get_unbalanced_endpoint,
    validate as validate_journal,
};
