use chrono::{FixedOffset, NaiveDate, SecondsFormat, TimeZone, Utc};

use crate::csv_schema::EntitySchema;
use crate::error::RowError;
use crate::models::MigrationRow;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Reads cells of one row against its schema. Converters take a `nullable`
/// flag: blank + nullable yields `None`, blank otherwise is missing data.
pub struct RowReader<'a> {
    schema: &'a EntitySchema,
    row: &'a MigrationRow,
}

impl<'a> RowReader<'a> {
    pub fn new(schema: &'a EntitySchema, row: &'a MigrationRow) -> Self {
        Self { schema, row }
    }

    /// Fails on the first blank column in `mandatory`, in list order.
    pub fn require(&self, mandatory: &[usize]) -> Result<(), RowError> {
        for idx in mandatory {
            if self.row.cell(*idx).is_empty() {
                return Err(RowError::MissingMandatoryData(self.schema.title(*idx)));
            }
        }
        Ok(())
    }

    fn raw(&self, idx: usize, nullable: bool) -> Result<Option<&'a str>, RowError> {
        let text = self.row.cell(idx);
        if self.row.is_undecodable(idx) {
            return Err(RowError::invalid(self.schema.title(idx), text, "not valid UTF-8"));
        }
        if text.is_empty() {
            if nullable {
                return Ok(None);
            }
            return Err(RowError::MissingMandatoryData(self.schema.title(idx)));
        }
        Ok(Some(text))
    }

    pub fn string(&self, idx: usize, nullable: bool) -> Result<Option<String>, RowError> {
        Ok(self.raw(idx, nullable)?.map(str::to_string))
    }

    pub fn amount_cents(&self, idx: usize, nullable: bool) -> Result<Option<i64>, RowError> {
        self.raw(idx, nullable)?
            .map(|text| {
                parse_amount_to_cents(text)
                    .map_err(|e| RowError::invalid(self.schema.title(idx), text, e))
            })
            .transpose()
    }

    pub fn boolean(&self, idx: usize, nullable: bool) -> Result<Option<bool>, RowError> {
        self.raw(idx, nullable)?
            .map(|text| {
                parse_bool(text).map_err(|e| RowError::invalid(self.schema.title(idx), text, e))
            })
            .transpose()
    }

    /// `YYYY-MM-DD` at midnight in `tz`, returned as UTC RFC 3339.
    pub fn date(
        &self,
        idx: usize,
        nullable: bool,
        tz: &FixedOffset,
    ) -> Result<Option<String>, RowError> {
        self.raw(idx, nullable)?
            .map(|text| {
                parse_date_in_timezone(text, tz)
                    .map_err(|e| RowError::invalid(self.schema.title(idx), text, e))
            })
            .transpose()
    }

    pub fn title(&self, idx: usize) -> &'static str {
        self.schema.title(idx)
    }
}

/// Floating point text to cents, rounded to two decimals. Thousands separators
/// are not accepted.
pub fn parse_amount_to_cents(raw: &str) -> Result<i64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| "not a number".to_string())?;
    if !value.is_finite() {
        return Err("not a finite number".to_string());
    }
    let cents = (value * 100.0).round();
    if cents.abs() >= i64::MAX as f64 {
        return Err("amount out of range".to_string());
    }
    Ok(cents as i64)
}

/// Lower, upper or title case `true`/`false` only.
pub fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim() {
        "true" | "TRUE" | "True" => Ok(true),
        "false" | "FALSE" | "False" => Ok(false),
        _ => Err("expected true or false".to_string()),
    }
}

// chrono accepts `2009-1-5` for %m/%d, so the shape is checked first.
fn is_padded_date(text: &str) -> bool {
    text.len() == 10
        && text.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        })
}

pub fn parse_date_in_timezone(raw: &str, tz: &FixedOffset) -> Result<String, String> {
    let text = raw.trim();
    if !is_padded_date(text) {
        return Err("date format must be YYYY-MM-DD".to_string());
    }
    let date = NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|_| "date format must be YYYY-MM-DD".to_string())?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| "date out of range".to_string())?;
    let local = tz
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(|| "date out of range".to_string())?;
    Ok(local
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_schema::schema_for;
    use crate::models::EntityKind;

    fn payment_row(cells: &[&str]) -> MigrationRow {
        MigrationRow::new(2, cells.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn amounts_round_to_cents() {
        assert_eq!(parse_amount_to_cents("1000"), Ok(100_000));
        assert_eq!(parse_amount_to_cents("-12.34"), Ok(-1_234));
        assert_eq!(parse_amount_to_cents("0.1"), Ok(10));
        assert!(parse_amount_to_cents("1,250.50").is_err());
        assert!(parse_amount_to_cents("abc").is_err());
        assert!(parse_amount_to_cents("NaN").is_err());
        assert!(parse_amount_to_cents("inf").is_err());
    }

    #[test]
    fn booleans_are_strict() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool("false"), Ok(false));
        assert_eq!(parse_bool("True"), Ok(true));
        assert!(parse_bool("tRuE").is_err());
        assert!(parse_bool("1").is_err());
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn dates_are_shifted_from_the_configured_timezone() {
        let utc = FixedOffset::east_opt(0).expect("utc offset");
        assert_eq!(
            parse_date_in_timezone("2009-12-30", &utc),
            Ok("2009-12-30T00:00:00Z".to_string())
        );
        let tokyo = FixedOffset::east_opt(9 * 3600).expect("tokyo offset");
        assert_eq!(
            parse_date_in_timezone("2009-12-30", &tokyo),
            Ok("2009-12-29T15:00:00Z".to_string())
        );
        assert!(parse_date_in_timezone("30/12/2009", &utc).is_err());
        assert!(parse_date_in_timezone("2009-02-30", &utc).is_err());
        assert!(parse_date_in_timezone("2009-1-5", &utc).is_err());
        assert!(parse_date_in_timezone("2009-01-5", &utc).is_err());
    }

    #[test]
    fn nullable_flag_decides_blank_handling() {
        let schema = schema_for(EntityKind::Payment);
        let row = payment_row(&["0", "", "", "CASH", "PAYMENT_FAILED", "2009-12-30", "bad"]);
        let reader = RowReader::new(&schema, &row);
        let tz = FixedOffset::east_opt(0).expect("utc offset");

        assert_eq!(reader.date(7, true, &tz), Ok(None));
        assert_eq!(
            reader.date(7, false, &tz),
            Err(RowError::MissingMandatoryData("payment_date"))
        );
        assert_eq!(
            reader.string(3, false),
            Ok(Some("CASH".to_string()))
        );
        let err = reader.date(6, false, &tz).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid expiry_date: 'bad' (date format must be YYYY-MM-DD)"
        );
    }

    #[test]
    fn first_missing_mandatory_column_is_named() {
        let schema = schema_for(EntityKind::Payment);
        let row = payment_row(&["0", "", "", "CASH", "", ""]);
        let reader = RowReader::new(&schema, &row);
        assert_eq!(
            reader.require(&[3, 4, 5]),
            Err(RowError::MissingMandatoryData("payment_status"))
        );
    }

    #[test]
    fn undecodable_cell_is_invalid_only_when_read() {
        let schema = schema_for(EntityKind::Payment);
        let mut row = payment_row(&["0", "", "", "CA\u{fffd}SH", "PAYMENT_FAILED"]);
        row.undecodable.push(3);
        let reader = RowReader::new(&schema, &row);
        assert_eq!(reader.string(4, false), Ok(Some("PAYMENT_FAILED".to_string())));
        let err = reader.string(3, false).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::MalformedInput);
        assert_eq!(
            err.to_string(),
            "invalid payment_method: 'CA\u{fffd}SH' (not valid UTF-8)"
        );
    }
}
