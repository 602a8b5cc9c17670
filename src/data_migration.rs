//! Import entry point: schema check, per-row validation, then a single
//! all-or-nothing commit of the rows that passed.

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::RunContext;
use crate::csv_schema::{schema_for, validate_payload, EntitySchema};
use crate::error::{MigrationError, RowError};
use crate::invoice_migration::validate_invoice_row;
use crate::models::{EntityKind, ImportBatchResult, Invoice, MigrationRow, Payment, RowFailure};
use crate::payment_migration::validate_payment_row;
use crate::repositories::{create_invoice, create_payment, finish_migration_job, start_migration_job};

const MAX_ERROR_SAMPLES: usize = 20;

/// A row that passed every check and waits for the commit.
#[derive(Debug)]
enum MigrationRecord {
    Invoice(Invoice),
    Payment(Payment),
}

impl MigrationRecord {
    fn insert(&self, conn: &Connection) -> rusqlite::Result<()> {
        match self {
            MigrationRecord::Invoice(invoice) => create_invoice(conn, invoice),
            MigrationRecord::Payment(payment) => create_payment(conn, payment),
        }
    }
}

struct ImportOutcome {
    rejected: Vec<RowFailure>,
    imported_count: usize,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn validate_row(
    conn: &Connection,
    schema: &EntitySchema,
    row: &MigrationRow,
    ctx: &RunContext,
    migrated_at: &str,
) -> Result<MigrationRecord, RowError> {
    match schema.entity {
        EntityKind::Invoice => {
            validate_invoice_row(conn, schema, row, &ctx.timezone, migrated_at)
                .map(MigrationRecord::Invoice)
        }
        EntityKind::Payment => {
            validate_payment_row(conn, schema, row, &ctx.timezone, migrated_at)
                .map(MigrationRecord::Payment)
        }
    }
}

fn run_import(
    conn: &mut Connection,
    entity: EntityKind,
    rows: &[MigrationRow],
    ctx: &RunContext,
) -> Result<ImportOutcome, MigrationError> {
    let schema = schema_for(entity);
    let migrated_at = now_rfc3339();

    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        if idx > 0 {
            ctx.deadline.check_rejecting(&rejected)?;
        }
        match validate_row(conn, &schema, row, ctx, &migrated_at) {
            Ok(record) => valid.push((row.row_number, record)),
            Err(error) => {
                tracing::warn!(
                    entity = %entity,
                    row_number = row.row_number,
                    class = error.class().as_str(),
                    error = %error,
                    "row rejected"
                );
                rejected.push(RowFailure {
                    row_number: row.row_number,
                    error,
                });
            }
        }
    }

    let Some(last_row_number) = valid.last().map(|(row_number, _)| *row_number) else {
        return Ok(ImportOutcome {
            rejected,
            imported_count: 0,
        });
    };

    let tx = conn.transaction()?;
    for (row_number, record) in &valid {
        ctx.deadline.check_rejecting(&rejected)?;
        record
            .insert(&tx)
            .map_err(|source| MigrationError::Persist {
                entity,
                row_number: *row_number,
                source,
                rejected: rejected.clone(),
            })?;
    }
    ctx.deadline.check_rejecting(&rejected)?;
    tx.commit().map_err(|source| MigrationError::Persist {
        entity,
        row_number: last_row_number,
        source,
        rejected: rejected.clone(),
    })?;

    Ok(ImportOutcome {
        imported_count: valid.len(),
        rejected,
    })
}

fn error_samples(rejected: &[RowFailure]) -> Option<String> {
    if rejected.is_empty() {
        return None;
    }
    Some(
        rejected
            .iter()
            .take(MAX_ERROR_SAMPLES)
            .map(|f| format!("row {}: {}", f.row_number, f.error))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Imports one CSV payload for `entity_name` (`INVOICE` or `PAYMENT`).
///
/// Row-level problems never fail the call: they come back in
/// [`ImportBatchResult::errors`] and the remaining rows are committed together.
/// A failed commit rolls back every row of the call and surfaces as
/// [`MigrationError::Persist`], which still lists the rejected rows.
pub fn import_data_migration(
    conn: &mut Connection,
    entity_name: &str,
    payload: &[u8],
    ctx: &RunContext,
) -> Result<ImportBatchResult, MigrationError> {
    let entity = EntityKind::from_entity_name(entity_name)?;
    let rows = validate_payload(entity, payload)?;

    let job_id = Uuid::new_v4().to_string();
    start_migration_job(conn, &job_id, entity.as_str(), &now_rfc3339(), rows.len())?;
    tracing::info!(entity = %entity, job_id = %job_id, total = rows.len(), "data migration started");

    match run_import(conn, entity, &rows, ctx) {
        Ok(outcome) => {
            finish_migration_job(
                conn,
                &job_id,
                "success",
                &now_rfc3339(),
                outcome.imported_count,
                outcome.rejected.len(),
                error_samples(&outcome.rejected).as_deref(),
            )?;
            tracing::info!(
                entity = %entity,
                job_id = %job_id,
                imported = outcome.imported_count,
                rejected = outcome.rejected.len(),
                "data migration finished"
            );
            Ok(ImportBatchResult {
                entity,
                errors: outcome.rejected,
                imported_count: outcome.imported_count,
                job_id,
            })
        }
        Err(err) => {
            tracing::error!(entity = %entity, job_id = %job_id, error = %err, "data migration aborted");
            let rejected_count = err.rejected_rows().len();
            if let Err(finish_err) = finish_migration_job(
                conn,
                &job_id,
                "failed",
                &now_rfc3339(),
                0,
                rejected_count,
                Some(&err.to_string()),
            ) {
                tracing::warn!(job_id = %job_id, error = %finish_err, "failed to record job failure");
            }
            Err(err)
        }
    }
}
