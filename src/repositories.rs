//! Ledger stores. Every function takes a `&Connection`, so the same calls run
//! against the plain connection (validation reads) or inside a `Transaction`
//! (commit and reconciliation), which derefs to one.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

use crate::models::{BillItem, Invoice, InvoiceBillItem, InvoiceStatus, InvoiceType, Payment};

fn text_column<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw = row.get::<_, String>(idx)?;
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value: {raw}").into(),
        )
    })
}

const INVOICE_COLUMNS: &str = r#"
    invoice_id, student_id, type, status, sub_total_cents, total_cents,
    outstanding_balance_cents, amount_paid_cents, amount_refunded_cents, is_exported,
    invoice_reference_id, invoice_reference_id2, created_at, migrated_at
"#;

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        invoice_id: row.get(0)?,
        student_id: row.get(1)?,
        invoice_type: text_column::<InvoiceType>(row, 2)?,
        status: text_column::<InvoiceStatus>(row, 3)?,
        sub_total_cents: row.get(4)?,
        total_cents: row.get(5)?,
        outstanding_balance_cents: row.get(6)?,
        amount_paid_cents: row.get(7)?,
        amount_refunded_cents: row.get(8)?,
        is_exported: row.get(9)?,
        invoice_reference_id: row.get(10)?,
        invoice_reference_id2: row.get(11)?,
        created_at: row.get(12)?,
        migrated_at: row.get(13)?,
    })
}

pub fn create_invoice(conn: &Connection, invoice: &Invoice) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO invoices(
            invoice_id, student_id, type, status, sub_total_cents, total_cents,
            outstanding_balance_cents, amount_paid_cents, amount_refunded_cents, is_exported,
            invoice_reference_id, invoice_reference_id2, created_at, migrated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            invoice.invoice_id,
            invoice.student_id,
            invoice.invoice_type.as_str(),
            invoice.status.as_str(),
            invoice.sub_total_cents,
            invoice.total_cents,
            invoice.outstanding_balance_cents,
            invoice.amount_paid_cents,
            invoice.amount_refunded_cents,
            invoice.is_exported,
            invoice.invoice_reference_id,
            invoice.invoice_reference_id2,
            invoice.created_at,
            invoice.migrated_at,
        ],
    )?;
    Ok(())
}

/// Latest invoice carrying `reference` as its first legacy reference.
pub fn find_invoice_by_reference(
    conn: &Connection,
    reference: &str,
) -> rusqlite::Result<Option<Invoice>> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_reference_id = ?1 ORDER BY created_at DESC, invoice_id ASC LIMIT 1"
    );
    conn.query_row(&sql, [reference], invoice_from_row).optional()
}

#[cfg(test)]
pub(crate) fn find_invoice_by_id(conn: &Connection, invoice_id: &str) -> rusqlite::Result<Option<Invoice>> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = ?1");
    conn.query_row(&sql, [invoice_id], invoice_from_row).optional()
}

/// Invoices created by the importer that can be linked to legacy bill items.
pub fn list_migrated_invoices(conn: &Connection) -> rusqlite::Result<Vec<Invoice>> {
    let sql = format!(
        r#"
        SELECT {INVOICE_COLUMNS}
        FROM invoices
        WHERE migrated_at IS NOT NULL
          AND TRIM(COALESCE(invoice_reference_id2, '')) <> ''
        ORDER BY created_at ASC, invoice_id ASC
        "#
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], invoice_from_row)?;
    let mut invoices = Vec::new();
    for row in rows {
        invoices.push(row?);
    }
    Ok(invoices)
}

pub fn create_payment(conn: &Connection, payment: &Payment) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO payments(
            payment_id, invoice_id, student_id, payment_method, payment_status,
            payment_due_date, payment_expiry_date, payment_date, amount_cents,
            payment_reference_id, is_exported, created_at, migrated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            payment.payment_id,
            payment.invoice_id,
            payment.student_id,
            payment.payment_method,
            payment.payment_status.as_str(),
            payment.due_date,
            payment.expiry_date,
            payment.payment_date,
            payment.amount_cents,
            payment.payment_reference_id,
            payment.is_exported,
            payment.created_at,
            payment.migrated_at,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn list_payments_by_invoice(
    conn: &Connection,
    invoice_id: &str,
) -> rusqlite::Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT payment_id, invoice_id, student_id, payment_method, payment_status,
               payment_due_date, payment_expiry_date, payment_date, amount_cents,
               COALESCE(payment_reference_id, ''), is_exported, created_at, migrated_at
        FROM payments
        WHERE invoice_id = ?1
        ORDER BY created_at ASC, payment_id ASC
        "#,
    )?;
    let rows = stmt.query_map([invoice_id], |row| {
        Ok(Payment {
            payment_id: row.get(0)?,
            invoice_id: row.get(1)?,
            student_id: row.get(2)?,
            payment_method: row.get(3)?,
            payment_status: text_column::<crate::models::PaymentStatus>(row, 4)?,
            due_date: row.get(5)?,
            expiry_date: row.get(6)?,
            payment_date: row.get(7)?,
            amount_cents: row.get(8)?,
            payment_reference_id: row.get(9)?,
            is_exported: row.get(10)?,
            created_at: row.get(11)?,
            migrated_at: row.get(12)?,
        })
    })?;
    let mut payments = Vec::new();
    for row in rows {
        payments.push(row?);
    }
    Ok(payments)
}

pub fn create_bill_item(conn: &Connection, item: &BillItem) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO bill_items(bill_item_sequence_number, student_id, reference, final_price_cents)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![
            item.bill_item_sequence_number,
            item.student_id,
            item.reference,
            item.final_price_cents,
        ],
    )?;
    Ok(())
}

pub fn find_bill_items_by_reference(
    conn: &Connection,
    student_id: &str,
    reference: &str,
) -> rusqlite::Result<Vec<BillItem>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT bill_item_sequence_number, student_id, reference, final_price_cents
        FROM bill_items
        WHERE student_id = ?1 AND reference = ?2
        ORDER BY bill_item_sequence_number ASC
        "#,
    )?;
    let rows = stmt.query_map(params![student_id, reference], |row| {
        Ok(BillItem {
            bill_item_sequence_number: row.get(0)?,
            student_id: row.get(1)?,
            reference: row.get(2)?,
            final_price_cents: row.get(3)?,
        })
    })?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn sum_final_price_by_student_and_reference(
    conn: &Connection,
    student_id: &str,
    reference: &str,
) -> rusqlite::Result<i64> {
    conn.query_row(
        r#"
        SELECT COALESCE(SUM(final_price_cents), 0)
        FROM bill_items
        WHERE student_id = ?1 AND reference = ?2
        "#,
        params![student_id, reference],
        |row| row.get::<_, i64>(0),
    )
}

/// Returns `false` when the (invoice, sequence number) pair already exists.
pub fn insert_invoice_bill_item_if_absent(
    conn: &Connection,
    item: &InvoiceBillItem,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        r#"
        INSERT INTO invoice_bill_items(
            invoice_bill_item_id, invoice_id, bill_item_sequence_number,
            past_billing_status, reference, created_at, migrated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(invoice_id, bill_item_sequence_number) DO NOTHING
        "#,
        params![
            item.invoice_bill_item_id,
            item.invoice_id,
            item.bill_item_sequence_number,
            item.past_billing_status,
            item.reference,
            item.created_at,
            item.migrated_at,
        ],
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
pub(crate) fn find_invoice_bill_items(
    conn: &Connection,
    invoice_id: &str,
) -> rusqlite::Result<Vec<InvoiceBillItem>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT invoice_bill_item_id, invoice_id, bill_item_sequence_number,
               past_billing_status, reference, created_at, migrated_at
        FROM invoice_bill_items
        WHERE invoice_id = ?1
        ORDER BY bill_item_sequence_number ASC
        "#,
    )?;
    let rows = stmt.query_map([invoice_id], |row| {
        Ok(InvoiceBillItem {
            invoice_bill_item_id: row.get(0)?,
            invoice_id: row.get(1)?,
            bill_item_sequence_number: row.get(2)?,
            past_billing_status: row.get(3)?,
            reference: row.get(4)?,
            created_at: row.get(5)?,
            migrated_at: row.get(6)?,
        })
    })?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn start_migration_job(
    conn: &Connection,
    job_id: &str,
    entity: &str,
    started_at: &str,
    total_count: usize,
) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO migration_jobs(id, entity, status, started_at, total_count, imported_count, error_count)
        VALUES (?1, ?2, 'running', ?3, ?4, 0, 0)
        "#,
        params![job_id, entity, started_at, total_count as i64],
    )?;
    Ok(())
}

pub fn finish_migration_job(
    conn: &Connection,
    job_id: &str,
    status: &str,
    finished_at: &str,
    imported_count: usize,
    error_count: usize,
    error_message: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        UPDATE migration_jobs
        SET status = ?1,
            finished_at = ?2,
            imported_count = ?3,
            error_count = ?4,
            error_message = ?5
        WHERE id = ?6
        "#,
        params![
            status,
            finished_at,
            imported_count as i64,
            error_count as i64,
            error_message,
            job_id
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::open_migrated_ledger;
    use crate::ledger_db::test_support::create_temp_path;
    use std::fs;

    fn sample_invoice(invoice_id: &str, reference: &str) -> Invoice {
        Invoice {
            invoice_id: invoice_id.to_string(),
            student_id: "student-1".to_string(),
            invoice_type: InvoiceType::Manual,
            status: InvoiceStatus::Issued,
            sub_total_cents: 100_000,
            total_cents: 100_000,
            outstanding_balance_cents: 100_000,
            amount_paid_cents: 0,
            amount_refunded_cents: 0,
            is_exported: true,
            invoice_reference_id: Some(reference.to_string()),
            invoice_reference_id2: Some(format!("{reference}-2")),
            created_at: "2009-12-30T00:00:00Z".to_string(),
            migrated_at: Some("2026-01-01T00:00:00Z".to_string()),
        }
    }

    #[test]
    fn invoices_round_trip_through_reference_lookup() {
        let db_path = create_temp_path("invoice_migration_repo_test", "db");
        let conn = open_migrated_ledger(&db_path).expect("open ledger");

        let invoice = sample_invoice("inv-1", "ref-1");
        create_invoice(&conn, &invoice).expect("create invoice");

        let found = find_invoice_by_reference(&conn, "ref-1")
            .expect("lookup")
            .expect("invoice exists");
        assert_eq!(found, invoice);
        assert!(find_invoice_by_reference(&conn, "ref-404")
            .expect("lookup")
            .is_none());
        assert_eq!(list_migrated_invoices(&conn).expect("list").len(), 1);

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn bill_item_sum_is_scoped_to_student_and_reference() {
        let db_path = create_temp_path("invoice_migration_repo_test", "db");
        let conn = open_migrated_ledger(&db_path).expect("open ledger");

        for (seq, student, reference, cents) in [
            (1, "student-1", "ref-2", 60_000),
            (2, "student-1", "ref-2", 40_000),
            (3, "student-2", "ref-2", 99_900),
            (4, "student-1", "other", 1_000),
        ] {
            create_bill_item(
                &conn,
                &BillItem {
                    bill_item_sequence_number: seq,
                    student_id: student.to_string(),
                    reference: Some(reference.to_string()),
                    final_price_cents: cents,
                },
            )
            .expect("create bill item");
        }

        assert_eq!(
            sum_final_price_by_student_and_reference(&conn, "student-1", "ref-2").expect("sum"),
            100_000
        );
        assert_eq!(
            sum_final_price_by_student_and_reference(&conn, "student-9", "ref-2").expect("sum"),
            0
        );
        let items = find_bill_items_by_reference(&conn, "student-1", "ref-2").expect("items");
        assert_eq!(
            items
                .iter()
                .map(|i| i.bill_item_sequence_number)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn invoice_bill_item_insert_is_conditional() {
        let db_path = create_temp_path("invoice_migration_repo_test", "db");
        let conn = open_migrated_ledger(&db_path).expect("open ledger");
        create_invoice(&conn, &sample_invoice("inv-1", "ref-1")).expect("create invoice");

        let mut item = InvoiceBillItem {
            invoice_bill_item_id: "ibi-1".to_string(),
            invoice_id: "inv-1".to_string(),
            bill_item_sequence_number: 7,
            past_billing_status: crate::models::BILLING_STATUS_BILLED.to_string(),
            reference: Some("ref-1-2".to_string()),
            created_at: "2009-12-30T00:00:00Z".to_string(),
            migrated_at: Some("2026-01-01T00:00:00Z".to_string()),
        };
        assert!(insert_invoice_bill_item_if_absent(&conn, &item).expect("first insert"));
        item.invoice_bill_item_id = "ibi-2".to_string();
        assert!(!insert_invoice_bill_item_if_absent(&conn, &item).expect("second insert"));

        let stored = find_invoice_bill_items(&conn, "inv-1").expect("find");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].invoice_bill_item_id, "ibi-1");

        drop(conn);
        let _ = fs::remove_file(&db_path);
    }
}
