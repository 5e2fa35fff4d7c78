// 🧹 Record Normalizer - raw cells → CanonicalRecord
//
// Policy favors completeness:
//   - dates: primary, then completed date; both bad → row rejected
//   - amount / fee / balance: unparseable → 0 (reported, never rejected)
//   - text: absent → ""
//   - currency: checked against an allow-list, advisory only

use crate::columns::{CanonicalField, ColumnMapping};
use crate::fingerprint::compute_tx_hash;
use crate::model::{CanonicalRecord, RawRecord, DECIMAL_SCALE};
use crate::report::{CurrencyAnomaly, NumericFallback, Rejection, RowNote};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

/// Currencies we expect to see; anything else is logged, not rejected
pub const ALLOWED_CURRENCIES: [&str; 3] = ["PLN", "EUR", "USD"];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y", "%Y/%m/%d"];

const DATETIME_FORMATS: [&str; 12] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

// ============================================================================
// FIELD PARSERS
// ============================================================================

/// Parse a calendar date from the shapes bank exports use.
/// Time-of-day, when present, is dropped.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Parse a signed decimal, rescaled to the storage scale.
///
/// Accepts surrounding whitespace, `23,50` (comma as the only separator)
/// and scientific notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let candidate = if s.contains(',') && !s.contains('.') {
        s.replace(',', ".")
    } else {
        s.to_string()
    };

    let mut value = Decimal::from_str(&candidate)
        .or_else(|_| Decimal::from_scientific(&candidate))
        .ok()?;

    // rounding can leave a signed zero ("-0.0000001" → "-0.000000")
    value.rescale(DECIMAL_SCALE);
    if value.is_zero() {
        value.set_sign_positive(true);
    }
    Some(value)
}

fn zero() -> Decimal {
    let mut z = Decimal::ZERO;
    z.rescale(DECIMAL_SCALE);
    z
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// A kept row plus the advisory notes raised while building it
#[derive(Debug, Clone)]
pub struct Normalized {
    pub record: CanonicalRecord,
    pub notes: Vec<RowNote>,
}

/// Normalizes the rows of one file
pub struct RecordNormalizer<'a> {
    mapping: &'a ColumnMapping,
    source: String,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(mapping: &'a ColumnMapping, source: impl Into<String>) -> Self {
        RecordNormalizer {
            mapping,
            source: source.into(),
        }
    }

    fn cell<'r>(&self, raw: &'r RawRecord, field: CanonicalField) -> Option<&'r str> {
        self.mapping
            .header_for(field)
            .and_then(|header| raw.get(header))
    }

    fn text(&self, raw: &RawRecord, field: CanonicalField) -> String {
        self.cell(raw, field)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    /// Decimal with zero fallback. `required` fields also report an
    /// absent/empty cell; optional ones (fee) only report bad text.
    fn decimal(
        &self,
        raw: &RawRecord,
        field: CanonicalField,
        required: bool,
        notes: &mut Vec<RowNote>,
    ) -> Decimal {
        let cell = self.cell(raw, field);

        if let Some(value) = cell.and_then(parse_decimal) {
            return value;
        }

        let present = cell.map(|c| !c.trim().is_empty()).unwrap_or(false);
        if present || required {
            debug!(origin = %raw.origin, field = %field, raw = ?cell, "numeric value defaulted to zero");
            notes.push(RowNote::NumericFallback(NumericFallback {
                origin: raw.origin.clone(),
                field,
                raw: cell.map(str::to_string),
            }));
        }

        zero()
    }

    /// Normalize one row, or reject it when no date can be resolved
    pub fn normalize(&self, raw: &RawRecord) -> Result<Normalized, Rejection> {
        let primary = self.cell(raw, CanonicalField::TransactionDate);
        let fallback = self.cell(raw, CanonicalField::CompletedDate);

        let transaction_date = match primary.and_then(parse_date) {
            Some(date) => date,
            None => match fallback.and_then(parse_date) {
                Some(date) => {
                    debug!(origin = %raw.origin, "primary date invalid, using completed date");
                    date
                }
                None => {
                    warn!(
                        origin = %raw.origin,
                        primary = ?primary,
                        fallback = ?fallback,
                        "no usable date, row rejected"
                    );
                    return Err(Rejection {
                        origin: raw.origin.clone(),
                        primary_date: primary.map(str::to_string),
                        fallback_date: fallback.map(str::to_string),
                    });
                }
            },
        };

        let mut notes = Vec::new();

        let amount = self.decimal(raw, CanonicalField::Amount, true, &mut notes);
        let fee = self.decimal(raw, CanonicalField::Fee, false, &mut notes);
        let balance = self.decimal(raw, CanonicalField::Balance, true, &mut notes);

        let description = self.text(raw, CanonicalField::Description);
        let tx_type = self.text(raw, CanonicalField::Type);
        let currency = self.text(raw, CanonicalField::Currency);

        if !ALLOWED_CURRENCIES.contains(&currency.as_str()) {
            warn!(origin = %raw.origin, currency = %currency, "unexpected currency");
            notes.push(RowNote::CurrencyAnomaly(CurrencyAnomaly {
                origin: raw.origin.clone(),
                currency: currency.clone(),
            }));
        }

        let tx_hash = compute_tx_hash(transaction_date, &amount, &currency, &balance);

        Ok(Normalized {
            record: CanonicalRecord {
                transaction_date,
                description,
                amount,
                fee,
                currency,
                tx_type,
                balance,
                source: self.source.clone(),
                tx_hash,
                origin: raw.origin.clone(),
            },
            notes,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
