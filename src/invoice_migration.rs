use chrono::FixedOffset;
use rusqlite::Connection;
use uuid::Uuid;

use crate::csv_schema::EntitySchema;
use crate::error::{BusinessError, RowError};
use crate::models::{cents_to_text, Invoice, InvoiceStatus, InvoiceType, MigrationRow};
use crate::repositories::sum_final_price_by_student_and_reference;
use crate::row_convert::RowReader;

const STUDENT_ID: usize = 2;
const TYPE: usize = 3;
const STATUS: usize = 4;
const SUB_TOTAL: usize = 5;
const TOTAL: usize = 6;
const CREATED_AT: usize = 7;
const IS_EXPORTED: usize = 9;
const REFERENCE1: usize = 10;
const REFERENCE2: usize = 11;

const MANDATORY_COLUMNS: &[usize] = &[
    STUDENT_ID,
    TYPE,
    STATUS,
    SUB_TOTAL,
    TOTAL,
    CREATED_AT,
    IS_EXPORTED,
    REFERENCE1,
];

struct Balances {
    outstanding_balance_cents: i64,
    amount_paid_cents: i64,
    amount_refunded_cents: i64,
}

/// Exactly one of the three balances carries the total.
fn derive_balances(status: InvoiceStatus, total_cents: i64) -> Balances {
    match status {
        InvoiceStatus::Paid => Balances {
            outstanding_balance_cents: 0,
            amount_paid_cents: total_cents,
            amount_refunded_cents: 0,
        },
        InvoiceStatus::Refunded => Balances {
            outstanding_balance_cents: 0,
            amount_paid_cents: 0,
            amount_refunded_cents: total_cents,
        },
        _ => Balances {
            outstanding_balance_cents: total_cents,
            amount_paid_cents: 0,
            amount_refunded_cents: 0,
        },
    }
}

fn validate_amount_sign(
    status: InvoiceStatus,
    total_cents: i64,
    sub_total_cents: i64,
) -> Result<(), BusinessError> {
    let (ok, expected_sign) = match status {
        InvoiceStatus::Paid => (total_cents >= 0 && sub_total_cents >= 0, "non-negative"),
        InvoiceStatus::Refunded => (total_cents <= 0 && sub_total_cents <= 0, "non-positive"),
        _ => return Ok(()),
    };
    if ok {
        return Ok(());
    }
    Err(BusinessError::AmountSign {
        status: status.to_string(),
        expected_sign,
        total: cents_to_text(total_cents),
        sub_total: cents_to_text(sub_total_cents),
    })
}

/// Converts one INVOICE row and checks it against the legacy bill items.
pub fn validate_invoice_row(
    conn: &Connection,
    schema: &EntitySchema,
    row: &MigrationRow,
    tz: &FixedOffset,
    migrated_at: &str,
) -> Result<Invoice, RowError> {
    let reader = RowReader::new(schema, row);
    reader.require(MANDATORY_COLUMNS)?;

    let student_id = reader.string(STUDENT_ID, false)?.unwrap_or_default();
    let type_text = reader.string(TYPE, false)?.unwrap_or_default();
    let status_text = reader.string(STATUS, false)?.unwrap_or_default();
    let sub_total_cents = reader.amount_cents(SUB_TOTAL, false)?.unwrap_or_default();
    let total_cents = reader.amount_cents(TOTAL, false)?.unwrap_or_default();
    let created_at = reader.date(CREATED_AT, false, tz)?.unwrap_or_default();
    let is_exported = reader.boolean(IS_EXPORTED, false)?.unwrap_or_default();
    let reference1 = reader.string(REFERENCE1, false)?;
    let reference2 = reader.string(REFERENCE2, true)?;

    let status = status_text
        .parse::<InvoiceStatus>()
        .map_err(|_| RowError::invalid(reader.title(STATUS), &status_text, "unknown invoice status"))?;
    let invoice_type = type_text
        .parse::<InvoiceType>()
        .map_err(|_| RowError::invalid(reader.title(TYPE), &type_text, "unknown invoice type"))?;
    let balances = derive_balances(status, total_cents);

    validate_amount_sign(status, total_cents, sub_total_cents)?;

    let bill_item_total = match reference2.as_deref() {
        Some(reference) => sum_final_price_by_student_and_reference(conn, &student_id, reference)
            .map_err(|e| BusinessError::LookupFailed {
                what: "bill item total",
                reason: e.to_string(),
            })?,
        None => 0,
    };
    if bill_item_total != total_cents {
        return Err(BusinessError::AmountMismatch {
            invoice_total: cents_to_text(total_cents),
            bill_item_total: cents_to_text(bill_item_total),
            student_id,
            reference: reference2.unwrap_or_default(),
        }
        .into());
    }

    Ok(Invoice {
        invoice_id: Uuid::new_v4().to_string(),
        student_id,
        invoice_type,
        status,
        sub_total_cents,
        total_cents,
        outstanding_balance_cents: balances.outstanding_balance_cents,
        amount_paid_cents: balances.amount_paid_cents,
        amount_refunded_cents: balances.amount_refunded_cents,
        is_exported,
        invoice_reference_id: reference1,
        invoice_reference_id2: reference2,
        created_at,
        migrated_at: Some(migrated_at.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_schema::schema_for;
    use crate::error::ErrorClass;
    use crate::ledger_db::open_migrated_ledger;
    use crate::ledger_db::test_support::create_temp_path;
    use crate::models::{BillItem, EntityKind};
    use crate::repositories::create_bill_item;
    use std::fs;

    const MIGRATED_AT: &str = "2026-10-19T00:00:00Z";

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).expect("utc offset")
    }

    fn invoice_row(line: &str) -> MigrationRow {
        MigrationRow::new(2, line.split(',').map(|c| c.to_string()).collect())
    }

    fn seed_bill_item(conn: &Connection, seq: i64, student: &str, reference: &str, cents: i64) {
        create_bill_item(
            conn,
            &BillItem {
                bill_item_sequence_number: seq,
                student_id: student.to_string(),
                reference: Some(reference.to_string()),
                final_price_cents: cents,
            },
        )
        .expect("seed bill item");
    }

    #[test]
    fn balances_follow_status() {
        let paid = derive_balances(InvoiceStatus::Paid, 100_000);
        assert_eq!(
            (paid.amount_paid_cents, paid.outstanding_balance_cents, paid.amount_refunded_cents),
            (100_000, 0, 0)
        );
        let refunded = derive_balances(InvoiceStatus::Refunded, -100_000);
        assert_eq!(
            (refunded.amount_refunded_cents, refunded.amount_paid_cents, refunded.outstanding_balance_cents),
            (-100_000, 0, 0)
        );
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Issued,
            InvoiceStatus::Void,
            InvoiceStatus::Failed,
        ] {
            let b = derive_balances(status, 500);
            assert_eq!(
                (b.outstanding_balance_cents, b.amount_paid_cents, b.amount_refunded_cents),
                (500, 0, 0)
            );
        }
    }

    #[test]
    fn sign_rules_reject_paid_negative_and_refunded_positive() {
        let err = validate_amount_sign(InvoiceStatus::Paid, -100_000, 100_000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "PAID invoice should have non-negative total and sub_total but got total: -1000.00 sub_total: 1000.00"
        );
        assert!(validate_amount_sign(InvoiceStatus::Refunded, 100_000, -100_000).is_err());
        assert!(validate_amount_sign(InvoiceStatus::Refunded, -100_000, -100_000).is_ok());
        assert!(validate_amount_sign(InvoiceStatus::Issued, -100_000, 5).is_ok());
    }

    #[test]
    fn bill_item_sum_must_match_total() {
        let db_path = create_temp_path("invoice_migration_invoice_test", "db");
        let conn = open_migrated_ledger(&db_path).expect("open ledger");
        let schema = schema_for(EntityKind::Invoice);
        seed_bill_item(&conn, 1, "student-1", "legacy-2", 60_000);
        seed_bill_item(&conn, 2, "student-1", "legacy-2", 40_000);

        let ok = validate_invoice_row(
            &conn,
            &schema,
            &invoice_row("1,,student-1,MANUAL,PAID,1000,1000,2009-12-30,,TRUE,legacy-1,legacy-2"),
            &utc(),
            MIGRATED_AT,
        )
        .expect("valid invoice");
        assert_eq!(ok.amount_paid_cents, 100_000);
        assert_eq!(ok.outstanding_balance_cents, 0);
        assert_eq!(ok.created_at, "2009-12-30T00:00:00Z");
        assert_eq!(ok.migrated_at.as_deref(), Some(MIGRATED_AT));

        let err = validate_invoice_row(
            &conn,
            &schema,
            &invoice_row("1,,student-1,MANUAL,ISSUED,900,900,2009-12-30,,TRUE,legacy-1,legacy-2"),
            &utc(),
            MIGRATED_AT,
        )
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::BusinessConsistency);
        assert_eq!(
            err.to_string(),
            "invoice total 900.00 does not match bill item final price sum 1000.00 for student student-1 reference legacy-2"
        );

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn unknown_status_and_type_are_malformed_input() {
        let db_path = create_temp_path("invoice_migration_invoice_test", "db");
        let conn = open_migrated_ledger(&db_path).expect("open ledger");
        let schema = schema_for(EntityKind::Invoice);

        let err = validate_invoice_row(
            &conn,
            &schema,
            &invoice_row("1,,student-1,MANUAL,OPEN,0,0,2009-12-30,,TRUE,legacy-1,"),
            &utc(),
            MIGRATED_AT,
        )
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::MalformedInput);
        assert_eq!(err.to_string(), "invalid status: 'OPEN' (unknown invoice status)");

        let err = validate_invoice_row(
            &conn,
            &schema,
            &invoice_row("1,,student-1,ONE_OFF,ISSUED,0,0,2009-12-30,,TRUE,legacy-1,"),
            &utc(),
            MIGRATED_AT,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid type: 'ONE_OFF' (unknown invoice type)");

        let err = validate_invoice_row(
            &conn,
            &schema,
            &invoice_row("1,,student-1,MANUAL,ISSUED,abc,0,2009-12-30,,TRUE,legacy-1,"),
            &utc(),
            MIGRATED_AT,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid sub_total: 'abc' (not a number)");

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn blank_second_reference_only_matches_zero_total() {
        let db_path = create_temp_path("invoice_migration_invoice_test", "db");
        let conn = open_migrated_ledger(&db_path).expect("open ledger");
        let schema = schema_for(EntityKind::Invoice);

        let invoice = validate_invoice_row(
            &conn,
            &schema,
            &invoice_row("1,,student-1,SCHEDULED,VOID,0,0,2009-12-30,,false,legacy-1,"),
            &utc(),
            MIGRATED_AT,
        )
        .expect("zero-total invoice without bill items");
        assert!(invoice.invoice_reference_id2.is_none());
        assert!(!invoice.is_exported);

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }
}
