//! Operations that write several rows and must look indivisible from outside.
//!
//! Each operation records an undo step for every write it commits in a
//! [Compensation] log, and the log is undone if a later step fails.

mod compensation;
mod import;
mod installments;
mod paired;
mod recurring;

pub use compensation::{Compensation, UndoStep};
pub use import::{
    AccountImport, ImportAccountsResponse, ImportedAccount, OPENING_BALANCE_DESCRIPTION,
    import_accounts, import_accounts_endpoint,
};
pub use installments::{
    InstallmentInput, InstallmentSeries, InstallmentSeriesResponse, MAX_INSTALLMENTS,
    create_installments, create_installments_endpoint,
};
pub use paired::{
    BillPayment, PairedTransaction, TransferRequest, pay_bill, pay_bill_endpoint, transfer,
    transfer_endpoint,
};
pub use recurring::{
    RecurringSeries, RecurringSeriesResponse, generate_recurring, generate_recurring_endpoint,
    occurrence_date,
};
