use crate::error::MigrationError;
use crate::models::{EntityKind, MigrationRow};

pub const INVOICE_COLUMNS: &[&str] = &[
    "invoice_csv_id",
    "invoice_id",
    "student_id",
    "type",
    "status",
    "sub_total",
    "total",
    "created_at",
    "invoice_sequence_number",
    "is_exported",
    "reference1",
    "reference2",
];

pub const PAYMENT_COLUMNS: &[&str] = &[
    "payment_csv_id",
    "payment_id",
    "invoice_id",
    "payment_method",
    "payment_status",
    "due_date",
    "expiry_date",
    "payment_date",
    "student_id",
    "payment_sequence_number",
    "is_exported",
    "created_at",
    "result_code",
    "amount",
    "reference",
];

#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    pub entity: EntityKind,
    pub columns: &'static [&'static str],
}

impl EntitySchema {
    pub fn title(&self, idx: usize) -> &'static str {
        self.columns.get(idx).copied().unwrap_or("unknown_column")
    }
}

pub fn schema_for(entity: EntityKind) -> EntitySchema {
    let columns = match entity {
        EntityKind::Invoice => INVOICE_COLUMNS,
        EntityKind::Payment => PAYMENT_COLUMNS,
    };
    EntitySchema { entity, columns }
}

fn trim_cell(text: &str) -> String {
    text.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}

fn decode_record(row_number: usize, record: &csv::ByteRecord) -> MigrationRow {
    let mut row = MigrationRow::new(row_number, Vec::with_capacity(record.len()));
    for (idx, field) in record.iter().enumerate() {
        let text = match std::str::from_utf8(field) {
            Ok(text) => trim_cell(text),
            Err(_) => {
                row.undecodable.push(idx);
                trim_cell(&String::from_utf8_lossy(field))
            }
        };
        row.cells.push(text);
    }
    row
}

/// Parses the whole payload into rows numbered from 1 (the header). Requires a
/// header plus at least one data row. Bytes that are not UTF-8 never fail the
/// call; the affected cells are marked on their row.
pub fn read_migration_rows(payload: &[u8]) -> Result<Vec<MigrationRow>, MigrationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(payload);

    let mut rows = Vec::new();
    for rec in reader.byte_records() {
        let rec = rec?;
        rows.push(decode_record(rows.len() + 1, &rec));
    }
    if rows.len() < 2 {
        return Err(MigrationError::EmptyPayload);
    }
    Ok(rows)
}

pub fn validate_header(schema: &EntitySchema, header: &[String]) -> Result<(), MigrationError> {
    if header.len() != schema.columns.len() {
        return Err(MigrationError::ColumnCount {
            entity: schema.entity,
            expected: schema.columns.len(),
        });
    }
    for (actual, &expected) in header.iter().zip(schema.columns) {
        if actual.to_lowercase() != expected {
            return Err(MigrationError::ColumnName {
                entity: schema.entity,
                actual: actual.clone(),
                expected,
            });
        }
    }
    Ok(())
}

/// Checks the header against the entity schema and returns the data rows,
/// numbered from 2.
pub fn validate_payload(
    entity: EntityKind,
    payload: &[u8],
) -> Result<Vec<MigrationRow>, MigrationError> {
    let mut rows = read_migration_rows(payload)?.into_iter();
    let header = rows.next().map(|row| row.cells).unwrap_or_default();
    validate_header(&schema_for(entity), &header)?;
    Ok(rows.collect())
}
