mod balance;
mod core;
mod create_endpoint;
mod delete_endpoint;
mod edit_endpoint;

pub use balance::{
    AccountBalance, check_credit_limit, recalculate_balance, recalculate_balances, sum_completed,
};
pub use core::{
    Account, AccountEdit, AccountType, NewAccount, create_account, create_account_table,
    delete_account, get_account, get_all_accounts, map_account_row, update_account,
};
pub use create_endpoint::{AccountResponse, create_account_endpoint, get_account_endpoint};
pub use delete_endpoint::{DeleteAccountResponse, delete_account_endpoint};
pub use edit_endpoint::{edit_account, edit_account_endpoint};
