// 📋 Batch Report - every anomaly, rejection and skip of one ingestion run
// Nothing is dropped silently: each excluded or skipped row appears here
// with its reason.

use crate::columns::CanonicalField;
use crate::model::{CanonicalRecord, RowOrigin};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// PER-FILE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub source: String,
    /// Data rows read (header excluded); 0 when the file was unreadable
    pub rows_read: usize,
    /// Rows that survived normalization
    pub rows_accepted: usize,
    pub missing_columns: Vec<CanonicalField>,
    /// Set when the file could not be read at all
    pub error: Option<String>,
}

impl FileReport {
    pub fn failed(path: PathBuf, source: String, error: String) -> Self {
        FileReport {
            path,
            source,
            rows_read: 0,
            rows_accepted: 0,
            missing_columns: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// ROW-LEVEL FINDINGS
// ============================================================================

/// DateResolutionFailure: neither primary nor fallback date parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub origin: RowOrigin,
    pub primary_date: Option<String>,
    pub fallback_date: Option<String>,
}

/// NumericCoercionFallback: value defaulted to zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFallback {
    pub origin: RowOrigin,
    pub field: CanonicalField,
    /// Raw cell text; None when the cell or column was absent
    pub raw: Option<String>,
}

/// CurrencyAnomaly: code outside the allow-list, kept as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyAnomaly {
    pub origin: RowOrigin,
    pub currency: String,
}

/// Advisory note produced while normalizing a kept row
#[derive(Debug, Clone, PartialEq)]
pub enum RowNote {
    NumericFallback(NumericFallback),
    CurrencyAnomaly(CurrencyAnomaly),
}

/// Two or more rows of the batch share a fingerprint (pre-write)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub tx_hash: String,
    pub origins: Vec<RowOrigin>,
}

// ============================================================================
// WRITE RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// tx_hash already persisted (or repeated earlier in the batch)
    Duplicate,
    /// Any other integrity constraint (NOT NULL, CHECK, ...)
    ConstraintViolation(String),
}

impl SkipReason {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SkipReason::Duplicate)
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Duplicate => write!(f, "duplicate tx_hash"),
            SkipReason::ConstraintViolation(msg) => write!(f, "constraint violation: {}", msg),
        }
    }
}

/// Identifying fields of a row the writer skipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub tx_hash: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub balance: Decimal,
    pub source: String,
    pub origin: RowOrigin,
    pub reason: SkipReason,
}

impl SkippedRow {
    pub fn from_record(record: &CanonicalRecord, reason: SkipReason) -> Self {
        SkippedRow {
            tx_hash: record.tx_hash.clone(),
            transaction_date: record.transaction_date,
            amount: record.amount,
            currency: record.currency.clone(),
            balance: record.balance,
            source: record.source.clone(),
            origin: record.origin.clone(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteReport {
    pub attempted: usize,
    pub inserted: usize,
    pub skipped: Vec<SkippedRow>,
}

impl WriteReport {
    pub fn duplicates(&self) -> usize {
        self.skipped.iter().filter(|s| s.reason.is_duplicate()).count()
    }

    pub fn constraint_violations(&self) -> usize {
        self.skipped.len() - self.duplicates()
    }
}

// ============================================================================
// BATCH REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub rejections: Vec<Rejection>,
    pub numeric_fallbacks: Vec<NumericFallback>,
    pub currency_anomalies: Vec<CurrencyAnomaly>,
    pub duplicate_fingerprints: Vec<DuplicateGroup>,
    pub write: WriteReport,
}

impl BatchReport {
    pub fn record_note(&mut self, note: RowNote) {
        match note {
            RowNote::NumericFallback(n) => self.numeric_fallbacks.push(n),
            RowNote::CurrencyAnomaly(a) => self.currency_anomalies.push(a),
        }
    }

    /// Data rows of every readable file
    pub fn input_rows(&self) -> usize {
        self.files.iter().map(|f| f.rows_read).sum()
    }

    pub fn rejected(&self) -> usize {
        self.rejections.len()
    }

    pub fn skipped(&self) -> usize {
        self.write.skipped.len()
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.is_failed())
    }

    /// input rows = inserted + rejected + skipped
    pub fn is_accounted(&self) -> bool {
        self.input_rows() == self.write.inserted + self.rejected() + self.skipped()
    }

    pub fn summary(&self) -> String {
        format!(
            "Files: {} ({} failed), Rows: {}, Inserted: {}, Rejected: {}, Skipped: {} ({} duplicate)",
            self.files.len(),
            self.failed_files().count(),
            self.input_rows(),
            self.write.inserted,
            self.rejected(),
            self.skipped(),
            self.write.duplicates(),
        )
    }
}
