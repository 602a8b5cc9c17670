pub mod bill_item_reconcile;
pub mod config;
pub mod csv_schema;
pub mod data_migration;
pub mod deadline;
pub mod error;
mod invoice_migration;
pub mod ledger_db;
pub mod logging;
pub mod models;
mod payment_migration;
pub mod repositories;
mod row_convert;

pub use bill_item_reconcile::{reconcile_invoice_bill_items, ReconcileReport};
pub use config::{MigrationConfig, RunContext};
pub use data_migration::import_data_migration;
pub use deadline::Deadline;
pub use error::{BusinessError, ErrorClass, MigrationError, RowError};
pub use ledger_db::{
    apply_embedded_migrations, inspect_status_at_path, ledger_table_counts, open_migrated_ledger,
};
pub use logging::init_tracing;
pub use models::{EntityKind, ImportBatchResult, RowFailure};
pub use payment_migration::{expected_payment_status, STATUS_MATRIX};
