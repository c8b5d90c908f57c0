//! The API endpoints URIs.
//!
//! For endpoints that take a parameter, e.g., '/api/accounts/{account_id}', use [format_endpoint].

/// The route to create transactions.
pub const TRANSACTIONS: &str = "/api/transactions";
/// The route to access a single transaction.
pub const TRANSACTION: &str = "/api/transactions/{transaction_id}";
/// The route to create an installment series.
pub const INSTALLMENTS: &str = "/api/transactions/installments";
/// The route to generate a recurring series.
pub const RECURRING: &str = "/api/transactions/recurring";
/// The route to transfer money between accounts.
pub const TRANSFERS: &str = "/api/transfers";
/// The route to pay off a credit card.
pub const PAY_BILL: &str = "/api/bills/pay";
/// The route to create accounts.
pub const ACCOUNTS: &str = "/api/accounts";
/// The route to access a single account.
pub const ACCOUNT: &str = "/api/accounts/{account_id}";
/// The route to set the ledger category of an account.
pub const ACCOUNT_LEDGER_CATEGORY: &str = "/api/accounts/{account_id}/ledger_category";
/// The route to import accounts with opening balances.
pub const IMPORT_ACCOUNTS: &str = "/api/accounts/import";
/// The route to close an accounting period.
pub const LOCK_PERIOD: &str = "/api/periods/lock";
/// The route to list transactions whose journal entries do not balance.
pub const UNBALANCED: &str = "/api/ledger/unbalanced";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/users/{user_id}', '{user_id}' is the parameter.
///
/// This function assumes that an endpoint path only contains ASCII characters
/// and a single parameter.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// the original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let mut param_start = None;
    let mut param_end = None;

    for (i, c) in endpoint_path.chars().enumerate() {
        if c == '{' {
            param_start = Some(i);
        } else if param_start.is_some() && c == '}' {
            param_end = Some(i + 1);
            break;
        }
    }

    let param_start = match param_start {
        Some(start) => start,
        None => return endpoint_path.to_string(),
    };

    let param_end = param_end.unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}
