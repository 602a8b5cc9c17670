use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrationError, RowError};

pub const BILLING_STATUS_BILLED: &str = "BILLING_STATUS_BILLED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    #[serde(rename = "INVOICE")]
    Invoice,
    #[serde(rename = "PAYMENT")]
    Payment,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Invoice => "INVOICE",
            EntityKind::Payment => "PAYMENT",
        }
    }

    /// Name the legacy transport uses for the entity, e.g. `PAYMENT_ENTITY`.
    pub fn legacy_name(self) -> &'static str {
        match self {
            EntityKind::Invoice => "INVOICE_ENTITY",
            EntityKind::Payment => "PAYMENT_ENTITY",
        }
    }

    /// Accepts `INVOICE` / `PAYMENT`, any case, with or without the legacy
    /// `_ENTITY` suffix.
    pub fn from_entity_name(raw: &str) -> Result<Self, MigrationError> {
        let upper = raw.trim().to_ascii_uppercase();
        let name = upper.strip_suffix("_ENTITY").unwrap_or(&upper);
        match name {
            "INVOICE" => Ok(EntityKind::Invoice),
            "PAYMENT" => Ok(EntityKind::Payment),
            _ => Err(MigrationError::UnsupportedEntity(raw.trim().to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Void,
    Failed,
    Refunded,
    Paid,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Issued,
        InvoiceStatus::Void,
        InvoiceStatus::Failed,
        InvoiceStatus::Refunded,
        InvoiceStatus::Paid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::Void => "VOID",
            InvoiceStatus::Failed => "FAILED",
            InvoiceStatus::Refunded => "REFUNDED",
            InvoiceStatus::Paid => "PAID",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or(())
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceType {
    Manual,
    Scheduled,
}

impl InvoiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceType::Manual => "MANUAL",
            InvoiceType::Scheduled => "SCHEDULED",
        }
    }
}

impl FromStr for InvoiceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "MANUAL" => Ok(InvoiceType::Manual),
            "SCHEDULED" => Ok(InvoiceType::Scheduled),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 3] = [
        PaymentStatus::Pending,
        PaymentStatus::Successful,
        PaymentStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PAYMENT_PENDING",
            PaymentStatus::Successful => "PAYMENT_SUCCESSFUL",
            PaymentStatus::Failed => "PAYMENT_FAILED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        match text.strip_prefix("PAYMENT_").unwrap_or(text) {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESSFUL" => Ok(PaymentStatus::Successful),
            "FAILED" => Ok(PaymentStatus::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the payload. `row_number` counts the header as row 1.
/// Cells whose bytes were not UTF-8 hold a lossy copy and are listed in
/// `undecodable`.
#[derive(Debug, Clone)]
pub struct MigrationRow {
    pub row_number: usize,
    pub cells: Vec<String>,
    pub undecodable: Vec<usize>,
}

impl MigrationRow {
    pub fn new(row_number: usize, cells: Vec<String>) -> Self {
        Self {
            row_number,
            cells,
            undecodable: Vec::new(),
        }
    }

    pub fn is_undecodable(&self, idx: usize) -> bool {
        self.undecodable.contains(&idx)
    }

    pub fn cell(&self, idx: usize) -> &str {
        self.cells.get(idx).map(|s| s.trim()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub invoice_id: String,
    pub student_id: String,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub sub_total_cents: i64,
    pub total_cents: i64,
    pub outstanding_balance_cents: i64,
    pub amount_paid_cents: i64,
    pub amount_refunded_cents: i64,
    pub is_exported: bool,
    pub invoice_reference_id: Option<String>,
    pub invoice_reference_id2: Option<String>,
    pub created_at: String,
    pub migrated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub payment_id: String,
    pub invoice_id: String,
    pub student_id: String,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub due_date: String,
    pub expiry_date: String,
    pub payment_date: Option<String>,
    pub amount_cents: i64,
    pub payment_reference_id: String,
    pub is_exported: bool,
    pub created_at: String,
    pub migrated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillItem {
    pub bill_item_sequence_number: i64,
    pub student_id: String,
    pub reference: Option<String>,
    pub final_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceBillItem {
    pub invoice_bill_item_id: String,
    pub invoice_id: String,
    pub bill_item_sequence_number: i64,
    pub past_billing_status: String,
    pub reference: Option<String>,
    pub created_at: String,
    pub migrated_at: Option<String>,
}

/// A rejected row and the reason it was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub row_number: usize,
    pub error: RowError,
}

#[derive(Debug, Clone)]
pub struct ImportBatchResult {
    pub entity: EntityKind,
    pub errors: Vec<RowFailure>,
    pub imported_count: usize,
    pub job_id: String,
}

pub fn cents_to_text(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_names_accept_legacy_suffix() {
        assert_eq!(
            EntityKind::from_entity_name("PAYMENT_ENTITY").unwrap(),
            EntityKind::Payment
        );
        assert_eq!(
            EntityKind::from_entity_name(" invoice ").unwrap(),
            EntityKind::Invoice
        );
        let err = EntityKind::from_entity_name("STUDENT").unwrap_err();
        assert_eq!(err.to_string(), "unsupported entity: STUDENT");
    }

    #[test]
    fn payment_status_accepts_short_and_prefixed_names() {
        assert_eq!("PAYMENT_FAILED".parse::<PaymentStatus>(), Ok(PaymentStatus::Failed));
        assert_eq!(
            "SUCCESSFUL".parse::<PaymentStatus>(),
            Ok(PaymentStatus::Successful)
        );
        assert!("successful".parse::<PaymentStatus>().is_err());
        assert!("PAYMENT_REFUNDED".parse::<PaymentStatus>().is_err());
        assert_eq!(PaymentStatus::Pending.to_string(), "PAYMENT_PENDING");
    }

    #[test]
    fn invoice_enums_match_exact_names() {
        assert_eq!("ISSUED".parse::<InvoiceStatus>(), Ok(InvoiceStatus::Issued));
        assert!("issued".parse::<InvoiceStatus>().is_err());
        assert_eq!(" MANUAL ".parse::<InvoiceType>(), Ok(InvoiceType::Manual));
        assert!("manual".parse::<InvoiceType>().is_err());
        assert_eq!(EntityKind::Payment.legacy_name(), "PAYMENT_ENTITY");
    }

    #[test]
    fn cents_render_with_two_decimals() {
        assert_eq!(cents_to_text(100_000), "1000.00");
        assert_eq!(cents_to_text(-5), "-0.05");
        assert_eq!(cents_to_text(0), "0.00");
    }

    #[test]
    fn missing_cells_read_as_blank() {
        let row = MigrationRow::new(2, vec![" a ".to_string()]);
        assert_eq!(row.cell(0), "a");
        assert_eq!(row.cell(5), "");
    }
}
