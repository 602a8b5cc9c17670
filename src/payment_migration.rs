use chrono::FixedOffset;
use rusqlite::Connection;
use uuid::Uuid;

use crate::csv_schema::EntitySchema;
use crate::error::{BusinessError, RowError};
use crate::models::{InvoiceStatus, MigrationRow, Payment, PaymentStatus};
use crate::repositories::find_invoice_by_reference;
use crate::row_convert::RowReader;

const PAYMENT_METHOD: usize = 3;
const PAYMENT_STATUS: usize = 4;
const DUE_DATE: usize = 5;
const EXPIRY_DATE: usize = 6;
const PAYMENT_DATE: usize = 7;
const STUDENT_ID: usize = 8;
const IS_EXPORTED: usize = 10;
const CREATED_AT: usize = 11;
const REFERENCE: usize = 14;

const MANDATORY_COLUMNS: &[usize] = &[
    PAYMENT_METHOD,
    PAYMENT_STATUS,
    DUE_DATE,
    EXPIRY_DATE,
    STUDENT_ID,
    IS_EXPORTED,
    CREATED_AT,
    REFERENCE,
];

/// Payment status each invoice status settles with. Statuses absent here
/// cannot carry a migrated payment at all.
pub const STATUS_MATRIX: &[(InvoiceStatus, PaymentStatus)] = &[
    (InvoiceStatus::Issued, PaymentStatus::Pending),
    (InvoiceStatus::Paid, PaymentStatus::Successful),
    (InvoiceStatus::Refunded, PaymentStatus::Successful),
    (InvoiceStatus::Failed, PaymentStatus::Failed),
];

pub fn expected_payment_status(invoice_status: InvoiceStatus) -> Option<PaymentStatus> {
    STATUS_MATRIX
        .iter()
        .find(|(status, _)| *status == invoice_status)
        .map(|(_, expected)| *expected)
}

pub fn validate_status_pair(
    invoice_status: InvoiceStatus,
    payment_status: PaymentStatus,
) -> Result<(), BusinessError> {
    match expected_payment_status(invoice_status) {
        None => Err(BusinessError::InvalidInvoiceStatus {
            invoice_status: invoice_status.to_string(),
            payment_status: payment_status.to_string(),
        }),
        Some(expected) if expected != payment_status => Err(BusinessError::PaymentStatusMismatch {
            invoice_status: invoice_status.to_string(),
            expected: expected.to_string(),
            actual: payment_status.to_string(),
        }),
        Some(_) => Ok(()),
    }
}

/// Converts one PAYMENT row and resolves the invoice it settles. Student id,
/// amount and invoice id on the result come from that invoice.
pub fn validate_payment_row(
    conn: &Connection,
    schema: &EntitySchema,
    row: &MigrationRow,
    tz: &FixedOffset,
    migrated_at: &str,
) -> Result<Payment, RowError> {
    let reader = RowReader::new(schema, row);
    reader.require(MANDATORY_COLUMNS)?;

    let payment_method = reader.string(PAYMENT_METHOD, false)?.unwrap_or_default();
    let status_text = reader.string(PAYMENT_STATUS, false)?.unwrap_or_default();
    let due_date = reader.date(DUE_DATE, false, tz)?.unwrap_or_default();
    let expiry_date = reader.date(EXPIRY_DATE, false, tz)?.unwrap_or_default();
    let payment_date = reader.date(PAYMENT_DATE, true, tz)?;
    let csv_student_id = reader.string(STUDENT_ID, false)?.unwrap_or_default();
    let is_exported = reader.boolean(IS_EXPORTED, false)?.unwrap_or_default();
    let created_at = reader.date(CREATED_AT, false, tz)?.unwrap_or_default();
    let reference = reader.string(REFERENCE, false)?.unwrap_or_default();

    let payment_status = status_text.parse::<PaymentStatus>().map_err(|_| {
        RowError::invalid(reader.title(PAYMENT_STATUS), &status_text, "unknown payment status")
    })?;

    // RFC 3339 UTC strings of equal shape order lexically.
    if due_date > expiry_date {
        return Err(RowError::DateOrder {
            due_column: reader.title(DUE_DATE),
            due: row.cell(DUE_DATE).to_string(),
            expiry_column: reader.title(EXPIRY_DATE),
            expiry: row.cell(EXPIRY_DATE).to_string(),
        });
    }
    if payment_status == PaymentStatus::Successful && payment_date.is_none() {
        return Err(RowError::MissingMandatoryData(reader.title(PAYMENT_DATE)));
    }

    let invoice = find_invoice_by_reference(conn, &reference)
        .map_err(|e| BusinessError::LookupFailed {
            what: "invoice",
            reason: e.to_string(),
        })?
        .ok_or_else(|| BusinessError::InvoiceNotFound(reference.clone()))?;

    validate_status_pair(invoice.status, payment_status)?;

    if csv_student_id != invoice.student_id {
        return Err(BusinessError::StudentMismatch {
            payment_student_id: csv_student_id,
            invoice_student_id: invoice.student_id,
        }
        .into());
    }

    Ok(Payment {
        payment_id: Uuid::new_v4().to_string(),
        invoice_id: invoice.invoice_id,
        student_id: invoice.student_id,
        payment_method,
        payment_status,
        due_date,
        expiry_date,
        payment_date,
        amount_cents: invoice.total_cents,
        payment_reference_id: reference,
        is_exported,
        created_at,
        migrated_at: Some(migrated_at.to_string()),
    })
}
