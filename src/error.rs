use thiserror::Error;

use crate::models::{EntityKind, RowFailure};

/// Which side of the migration a row-level error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The CSV cell itself is missing or unreadable.
    MalformedInput,
    /// The row is well formed but disagrees with data already in the ledger.
    BusinessConsistency,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::MalformedInput => "MALFORMED_INPUT",
            ErrorClass::BusinessConsistency => "BUSINESS_CONSISTENCY",
        }
    }
}

/// Rejects a single row. Never aborts sibling rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing mandatory data: {0}")]
    MissingMandatoryData(&'static str),
    #[error("invalid {column}: '{value}' ({reason})")]
    InvalidValue {
        column: &'static str,
        value: String,
        reason: String,
    },
    #[error("{due_column} {due} should not be later than {expiry_column} {expiry}")]
    DateOrder {
        due_column: &'static str,
        due: String,
        expiry_column: &'static str,
        expiry: String,
    },
    #[error(transparent)]
    Business(#[from] BusinessError),
}

impl RowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RowError::Business(_) => ErrorClass::BusinessConsistency,
            _ => ErrorClass::MalformedInput,
        }
    }

    pub(crate) fn invalid(
        column: &'static str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        RowError::InvalidValue {
            column,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("invoice with reference {0} not found")]
    InvoiceNotFound(String),
    #[error("{what} lookup failed: {reason}")]
    LookupFailed { what: &'static str, reason: String },
    #[error("invalid invoice status: {invoice_status} for payment status: {payment_status}")]
    InvalidInvoiceStatus {
        invoice_status: String,
        payment_status: String,
    },
    #[error("{invoice_status} invoice should have payment status {expected} but got: {actual}")]
    PaymentStatusMismatch {
        invoice_status: String,
        expected: String,
        actual: String,
    },
    #[error("payment student id {payment_student_id} does not match invoice student id {invoice_student_id}")]
    StudentMismatch {
        payment_student_id: String,
        invoice_student_id: String,
    },
    #[error("{status} invoice should have {expected_sign} total and sub_total but got total: {total} sub_total: {sub_total}")]
    AmountSign {
        status: String,
        expected_sign: &'static str,
        total: String,
        sub_total: String,
    },
    #[error("invoice total {invoice_total} does not match bill item final price sum {bill_item_total} for student {student_id} reference {reference}")]
    AmountMismatch {
        invoice_total: String,
        bill_item_total: String,
        student_id: String,
        reference: String,
    },
}

/// Call-scoped failures: the payload is unusable, or the commit did not happen.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("no data in CSV file")]
    EmptyPayload,
    #[error("{} - csv file invalid format - number of column should be {expected}", .entity.legacy_name())]
    ColumnCount { entity: EntityKind, expected: usize },
    #[error("{} - csv file invalid format - {actual} column (toLowerCase) should be '{expected}'", .entity.legacy_name())]
    ColumnName {
        entity: EntityKind,
        actual: String,
        expected: &'static str,
    },
    #[error("unsupported entity: {0}")]
    UnsupportedEntity(String),
    #[error("invalid CSV payload: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to persist {entity} row {row_number}: {source}")]
    Persist {
        entity: EntityKind,
        row_number: usize,
        #[source]
        source: rusqlite::Error,
        rejected: Vec<RowFailure>,
    },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("deadline exceeded, transaction aborted")]
    DeadlineExceeded { rejected: Vec<RowFailure> },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MigrationError {
    pub fn category(&self) -> &'static str {
        match self {
            MigrationError::EmptyPayload
            | MigrationError::ColumnCount { .. }
            | MigrationError::ColumnName { .. }
            | MigrationError::Csv(_) => "VALIDATION_ERROR",
            MigrationError::UnsupportedEntity(_) => "UNSUPPORTED_ENTITY",
            MigrationError::Persist { .. } | MigrationError::Storage(_) => "PERSISTENCE_ERROR",
            MigrationError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            MigrationError::Io(_) | MigrationError::Serde(_) | MigrationError::Config(_) => {
                "ENVIRONMENT_ERROR"
            }
        }
    }

    /// Rows already rejected when an import was aborted. Empty for every other
    /// failure.
    pub fn rejected_rows(&self) -> &[RowFailure] {
        match self {
            MigrationError::Persist { rejected, .. }
            | MigrationError::DeadlineExceeded { rejected } => rejected,
            _ => &[],
        }
    }
}
