use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::RunContext;
use crate::error::MigrationError;
use crate::models::{InvoiceBillItem, BILLING_STATUS_BILLED};
use crate::repositories::{
    find_bill_items_by_reference, insert_invoice_bill_item_if_absent, list_migrated_invoices,
};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub invoices_scanned: usize,
    pub bill_items_seen: usize,
    pub created: usize,
    pub already_mapped: usize,
}

/// Links legacy bill items to the invoices the importer created, matching on
/// student id and the invoice's second legacy reference. Safe to re-run: an
/// existing (invoice, sequence number) mapping is left untouched.
///
/// The whole run is one transaction; any failure leaves the ledger as it was.
pub fn reconcile_invoice_bill_items(
    conn: &mut Connection,
    ctx: &RunContext,
) -> Result<ReconcileReport, MigrationError> {
    let tx = conn.transaction()?;
    let invoices = list_migrated_invoices(&tx)?;
    if invoices.is_empty() {
        tracing::info!("no migrated invoices to reconcile");
        return Ok(ReconcileReport::default());
    }

    let migrated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut report = ReconcileReport::default();
    for invoice in &invoices {
        ctx.deadline.check()?;
        report.invoices_scanned += 1;
        let Some(reference) = invoice.invoice_reference_id2.as_deref() else {
            continue;
        };

        let bill_items = find_bill_items_by_reference(&tx, &invoice.student_id, reference)?;
        for bill_item in bill_items {
            report.bill_items_seen += 1;
            let mapping = InvoiceBillItem {
                invoice_bill_item_id: Uuid::new_v4().to_string(),
                invoice_id: invoice.invoice_id.clone(),
                bill_item_sequence_number: bill_item.bill_item_sequence_number,
                past_billing_status: BILLING_STATUS_BILLED.to_string(),
                reference: bill_item.reference,
                created_at: invoice.created_at.clone(),
                migrated_at: Some(migrated_at.clone()),
            };
            if insert_invoice_bill_item_if_absent(&tx, &mapping)? {
                report.created += 1;
            } else {
                report.already_mapped += 1;
            }
        }
    }

    ctx.deadline.check()?;
    tx.commit()?;
    tracing::info!(
        invoices = report.invoices_scanned,
        bill_items = report.bill_items_seen,
        created = report.created,
        already_mapped = report.already_mapped,
        "bill item reconciliation committed"
    );
    Ok(report)
}
