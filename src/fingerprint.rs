// 🔑 Fingerprint Generator - content hash used as the dedup key
// tx_hash depends ONLY on (date, amount, currency, balance).
// Description, type, fee and source never affect it.

use crate::model::{CanonicalRecord, DECIMAL_SCALE};
use crate::report::DuplicateGroup;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::warn;

/// Digest bytes kept (128 bits → 32 hex chars)
const DIGEST_BYTES: usize = 16;

/// Decimal text used inside the hash input: always 6 fractional digits
fn fixed_scale(value: &Decimal) -> String {
    let mut v = *value;
    v.rescale(DECIMAL_SCALE);
    if v.is_zero() {
        v.set_sign_positive(true);
    }
    v.to_string()
}

/// Hash input: date, amount, currency, balance - in that order, no separators
pub fn fingerprint_input(
    transaction_date: NaiveDate,
    amount: &Decimal,
    currency: &str,
    balance: &Decimal,
) -> String {
    format!(
        "{}{}{}{}",
        transaction_date.format("%Y-%m-%d"),
        fixed_scale(amount),
        currency,
        fixed_scale(balance)
    )
}

/// Compute tx_hash for the four fingerprint fields
pub fn compute_tx_hash(
    transaction_date: NaiveDate,
    amount: &Decimal,
    currency: &str,
    balance: &Decimal,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint_input(transaction_date, amount, currency, balance));
    let digest = hasher.finalize();

    digest[..DIGEST_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Recompute the hash of an already-built record
pub fn record_tx_hash(record: &CanonicalRecord) -> String {
    compute_tx_hash(
        record.transaction_date,
        &record.amount,
        &record.currency,
        &record.balance,
    )
}

/// Scan a batch for rows sharing a fingerprint.
///
/// Groups come back in order of first appearance. Nothing is removed: the
/// writer is the authoritative dedup boundary.
pub fn find_duplicate_fingerprints(records: &[CanonicalRecord]) -> Vec<DuplicateGroup> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for record in records {
        match positions.get(record.tx_hash.as_str()) {
            Some(&idx) => groups[idx].origins.push(record.origin.clone()),
            None => {
                positions.insert(record.tx_hash.as_str(), groups.len());
                groups.push(DuplicateGroup {
                    tx_hash: record.tx_hash.clone(),
                    origins: vec![record.origin.clone()],
                });
            }
        }
    }

    groups.retain(|g| g.origins.len() > 1);

    for group in &groups {
        warn!(
            tx_hash = %group.tx_hash,
            rows = group.origins.len(),
            "duplicate fingerprint within batch"
        );
    }

    groups
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RowOrigin;
    use crate::normalize::parse_decimal;
    use std::path::PathBuf;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(line: usize, amount: &str, description: &str, tx_type: &str, fee: &str, source: &str) -> CanonicalRecord {
        let amount = dec(amount);
        let balance = dec("1000.00");
        let transaction_date = date(2024, 1, 5);
        CanonicalRecord {
            transaction_date,
            description: description.to_string(),
            amount,
            fee: dec(fee),
            currency: "PLN".to_string(),
            tx_type: tx_type.to_string(),
            balance,
            source: source.to_string(),
            tx_hash: compute_tx_hash(transaction_date, &amount, "PLN", &balance),
            origin: RowOrigin {
                file: PathBuf::from("test.csv"),
                line,
            },
        }
    }

    #[test]
    fn test_hash_is_32_hex_chars() {
        let hash = compute_tx_hash(date(2024, 1, 5), &dec("-23.50"), "PLN", &dec("1000.00"));

        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_input_order_and_format() {
        let input = fingerprint_input(date(2024, 1, 5), &dec("-23.5"), "PLN", &dec("1000"));
        assert_eq!(input, "2024-01-05-23.500000PLN1000.000000");
    }

    #[test]
    fn test_same_value_different_text_collides() {
        // "-23.5" and "-23.50" are the same stored value
        let a = compute_tx_hash(date(2024, 1, 5), &dec("-23.5"), "PLN", &dec("1000"));
        let b = compute_tx_hash(date(2024, 1, 5), &dec("-23.50"), "PLN", &dec("1000.00"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_signed_zero_hashes_like_zero() {
        let tiny = parse_decimal("-0.0000001").unwrap();
        let mut neg_zero = dec("-0");
        neg_zero.set_sign_negative(true);

        let zero = compute_tx_hash(date(2024, 1, 5), &Decimal::ZERO, "PLN", &dec("1000"));
        assert_eq!(zero, compute_tx_hash(date(2024, 1, 5), &tiny, "PLN", &dec("1000")));
        assert_eq!(zero, compute_tx_hash(date(2024, 1, 5), &neg_zero, "PLN", &dec("1000")));
        assert_eq!(
            fingerprint_input(date(2024, 1, 5), &neg_zero, "PLN", &dec("1000")),
            "2024-01-050.000000PLN1000.000000"
        );
    }

    #[test]
    fn test_non_key_fields_do_not_affect_hash() {
        let a = record(2, "-23.50", "Zabka", "Card Payment", "0", "revolut");
        let b = record(3, "-23.50", "Something else", "Transfer", "1.99", "pekao");

        assert_eq!(a.tx_hash, b.tx_hash);
        assert_eq!(record_tx_hash(&a), a.tx_hash);
    }

    #[test]
    fn test_each_key_field_changes_hash() {
        let base = compute_tx_hash(date(2024, 1, 5), &dec("-23.50"), "PLN", &dec("1000.00"));

        assert_ne!(base, compute_tx_hash(date(2024, 1, 6), &dec("-23.50"), "PLN", &dec("1000.00")));
        assert_ne!(base, compute_tx_hash(date(2024, 1, 5), &dec("-23.51"), "PLN", &dec("1000.00")));
        assert_ne!(base, compute_tx_hash(date(2024, 1, 5), &dec("-23.50"), "EUR", &dec("1000.00")));
        assert_ne!(base, compute_tx_hash(date(2024, 1, 5), &dec("-23.50"), "PLN", &dec("1000.01")));
    }

    #[test]
    fn test_find_duplicates_reports_all_members() {
        let records = vec![
            record(2, "-23.50", "a", "t", "0", "revolut"),
            record(3, "-10.00", "b", "t", "0", "revolut"),
            record(4, "-23.50", "c", "t", "0", "revolut"),
            record(5, "-23.50", "d", "t", "0", "revolut"),
        ];

        let groups = find_duplicate_fingerprints(&records);

        assert_eq!(groups.len(), 1);
        let lines: Vec<usize> = groups[0].origins.iter().map(|o| o.line).collect();
        assert_eq!(lines, vec![2, 4, 5]);
    }

    #[test]
    fn test_find_duplicates_none() {
        let records = vec![
            record(2, "-23.50", "a", "t", "0", "revolut"),
            record(3, "-10.00", "b", "t", "0", "revolut"),
        ];
        assert!(find_duplicate_fingerprints(&records).is_empty());
    }
}
