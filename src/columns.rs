// 🧭 Column Reconciler - map per-bank headers onto canonical fields
// Each bank exports its own header names (and languages). One synonym table
// covers all of them; first synonym present in the header wins.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    TransactionDate,
    CompletedDate,
    Description,
    Amount,
    Currency,
    Type,
    Fee,
    Balance,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 8] = [
        CanonicalField::TransactionDate,
        CanonicalField::CompletedDate,
        CanonicalField::Description,
        CanonicalField::Amount,
        CanonicalField::Currency,
        CanonicalField::Type,
        CanonicalField::Fee,
        CanonicalField::Balance,
    ];

    /// Column name used in reports and in the persisted schema
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::TransactionDate => "transaction_date",
            CanonicalField::CompletedDate => "completed_date",
            CanonicalField::Description => "description",
            CanonicalField::Amount => "amount",
            CanonicalField::Currency => "currency",
            CanonicalField::Type => "type",
            CanonicalField::Fee => "fee",
            CanonicalField::Balance => "balance",
        }
    }

    /// Recognized header names, lowercase, in priority order.
    /// English, Russian and Polish exports.
    pub fn synonyms(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::TransactionDate => &[
                "date",
                "started date",
                "transaction date",
                "дата",
                "дата начала",
                "data",
                "data operacji",
                "data transakcji",
            ],
            CanonicalField::CompletedDate => &[
                "completed date",
                "дата завершения",
                "data księgowania",
                "data zakończenia",
            ],
            CanonicalField::Description => &["description", "описание", "opis"],
            CanonicalField::Amount => &["amount", "сумма", "kwota"],
            CanonicalField::Currency => &["currency", "валюта", "waluta"],
            CanonicalField::Type => &["type", "тип", "typ", "typ transakcji"],
            CanonicalField::Fee => &["fee", "комиссия", "prowizja", "opłata"],
            CanonicalField::Balance => &["balance", "баланс", "saldo", "saldo po operacji"],
        }
    }
}

impl std::fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

/// Raw column that supplies a canonical field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub field: CanonicalField,
    /// Header exactly as it appears in the file
    pub header: String,
    pub index: usize,
}

/// Result of reconciling one header row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub columns: Vec<MappedColumn>,
    /// Canonical fields with no matching header (MissingColumnWarning)
    pub missing: Vec<CanonicalField>,
}

impl ColumnMapping {
    /// Raw header name supplying `field`, if any
    pub fn header_for(&self, field: CanonicalField) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.header.as_str())
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.header_for(field).is_some()
    }
}

fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Build the canonical mapping for a header row.
///
/// Never fails: unmatched fields are listed in `missing` and the caller
/// proceeds with them absent.
pub fn reconcile<S: AsRef<str>>(headers: &[S], file_label: &str) -> ColumnMapping {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| normalize_header(h.as_ref()))
        .collect();

    let mut mapping = ColumnMapping::default();

    for field in CanonicalField::ALL {
        let hit = field.synonyms().iter().find_map(|synonym| {
            normalized
                .iter()
                .position(|h| h == synonym)
                .map(|index| MappedColumn {
                    field,
                    header: headers[index].as_ref().to_string(),
                    index,
                })
        });

        match hit {
            Some(column) => {
                debug!(file = file_label, field = %field, header = %column.header, "column mapped");
                mapping.columns.push(column);
            }
            None => {
                warn!(
                    file = file_label,
                    field = %field,
                    synonyms = ?field.synonyms(),
                    "required column not found"
                );
                mapping.missing.push(field);
            }
        }
    }

    mapping
}

// ============================================================================
// SOURCE DETECTION
// ============================================================================

/// Institution identifier from the file name: the token before the first `_`.
///
/// `revolut_2024.csv` → `revolut`. Names without an underscore (or starting
/// with one) fall back to the file stem.
pub fn source_from_file_name(file_path: &Path) -> String {
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    match file_name.split_once('_') {
        Some((token, _)) if !token.is_empty() => token.to_string(),
        _ => file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
