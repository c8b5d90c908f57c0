//! Transaction management for the ledger.
//!
//! This module contains everything related to single transactions:
//! - The `Transaction` model and `TransactionBuilder` for creating transactions
//! - Database functions for storing, querying, linking and deleting transactions
//! - The endpoints for creating, editing and deleting transactions

mod core;
mod create_endpoint;
mod delete_endpoint;
mod edit_endpoint;

pub use core::{
    Recurrence, Transaction, TransactionBuilder, TransactionStatus, TransactionType,
    count_transactions, create_transaction, create_transaction_table, delete_transaction_row,
    get_account_transactions, get_series_transactions, get_transaction, link_transactions,
    map_transaction_row, promote_series_successor, refresh_invoice_months,
    set_installment_position,
};
pub(crate) use core::insert_transaction;
pub use create_endpoint::{
    CreateTransactionResponse, create_transaction_and_recalculate, create_transaction_endpoint,
};
pub use delete_endpoint::{DeleteTransactionResponse, delete_transaction, delete_transaction_endpoint};
pub use edit_endpoint::{
    EditTransactionResponse, TransactionEdit, edit_transaction, edit_transaction_endpoint,
};
