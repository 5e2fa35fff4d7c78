// 📦 Transaction model - raw rows, canonical records, persisted rows

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fractional digits kept for every decimal column (DECIMAL(14,6))
pub const DECIMAL_SCALE: u32 = 6;

/// Where a row came from: file + 1-based line number (header is line 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOrigin {
    pub file: PathBuf,
    pub line: usize,
}

impl std::fmt::Display for RowOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

// ============================================================================
// RAW RECORD
// ============================================================================

/// One data row as read from a file: (header, cell) pairs in header order.
/// Discarded once normalized.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub origin: RowOrigin,
    pub cells: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(origin: RowOrigin, cells: Vec<(String, String)>) -> Self {
        RawRecord { origin, cells }
    }

    /// Cell value for an exact header name (first occurrence wins)
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// Normalized transaction, ready for fingerprinting and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub balance: Decimal,
    pub source: String,
    pub tx_hash: String,

    /// Provenance for the batch report; never persisted
    pub origin: RowOrigin,
}

impl CanonicalRecord {
    /// Short human-readable identification used in logs and skip reports
    pub fn summary(&self) -> String {
        format!(
            "{} {} {} (balance {})",
            self.transaction_date, self.amount, self.currency, self.balance
        )
    }
}

// ============================================================================
// PERSISTED TRANSACTION
// ============================================================================

/// A row of the `transactions` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTransaction {
    pub id: i64,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    /// Assigned out-of-band; ingestion always leaves it NULL
    pub category: Option<String>,
    pub balance: Decimal,
    pub source: String,
    pub tx_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_get_first_match() {
        let rec = RawRecord::new(
            RowOrigin {
                file: PathBuf::from("a.csv"),
                line: 2,
            },
            vec![
                ("amount".to_string(), "1.00".to_string()),
                ("amount".to_string(), "2.00".to_string()),
            ],
        );

        assert_eq!(rec.get("amount"), Some("1.00"));
        assert_eq!(rec.get("fee"), None);
    }

    #[test]
    fn test_origin_display() {
        let origin = RowOrigin {
            file: PathBuf::from("data/revolut_2024.csv"),
            line: 7,
        };
        assert_eq!(origin.to_string(), "data/revolut_2024.csv:7");
    }
}
