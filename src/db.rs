// 🗄️ Persistence Writer - schema + idempotent batch inserts
//
// One outer transaction per batch, one SAVEPOINT per row. A row that hits a
// constraint (duplicate tx_hash, CHECK, NOT NULL) is rolled back to its
// savepoint and reported; the batch keeps going, is count-checked and
// committed at the end.

use crate::error::IngestError;
use crate::fingerprint::record_tx_hash;
use crate::model::{CanonicalRecord, PersistedTransaction};
use crate::report::{SkipReason, SkippedRow, WriteReport};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Columns selected whenever a PersistedTransaction is read back.
/// Decimals are cast to TEXT so no float round-trip happens in Rust.
pub(crate) const SELECT_COLUMNS: &str = "id, transaction_date, description,
    CAST(amount AS TEXT), CAST(fee AS TEXT), currency, type, category,
    CAST(balance AS TEXT), source, tx_hash";

// ============================================================================
// CONNECTION & SCHEMA
// ============================================================================

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open (or create) the database file. The caller owns the handle and
/// closes it at the end of the batch.
pub fn open_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    // Concurrent imports queue on the write lock instead of failing
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Close explicitly so close errors are not swallowed by Drop
pub fn close_database(conn: Connection) -> Result<()> {
    conn.close()
        .map_err(|(_, e)| e)
        .context("Failed to close database")
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases report "memory" instead
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // SQLite ignores declared lengths and precision, hence the CHECKs
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_date DATE NOT NULL,
            description TEXT NOT NULL,
            amount DECIMAL(14, 6) NOT NULL CHECK (abs(amount) < 100000000),
            fee DECIMAL(14, 6) NOT NULL CHECK (abs(fee) < 100000000),
            currency VARCHAR(3) NOT NULL CHECK (length(currency) <= 3),
            type VARCHAR(50) NOT NULL CHECK (length(type) <= 50),
            category VARCHAR(50) CHECK (category IS NULL OR length(category) <= 50),
            balance DECIMAL(14, 6) NOT NULL CHECK (abs(balance) < 100000000),
            source VARCHAR(50) NOT NULL CHECK (length(source) <= 50),
            tx_hash VARCHAR(50) NOT NULL UNIQUE CHECK (length(tx_hash) <= 50)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(transaction_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_source ON transactions(source)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_currency ON transactions(currency)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW OUTCOMES
// ============================================================================

/// Terminal state of one row: pending → inserted | skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted { id: i64 },
    Skipped(SkipReason),
}

/// Sort a failed insert into "skip this row" or "abort the batch"
fn classify_failure(err: rusqlite::Error) -> Result<SkipReason, rusqlite::Error> {
    if let rusqlite::Error::SqliteFailure(e, msg) = &err {
        if e.code == ErrorCode::ConstraintViolation {
            let reason = if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                SkipReason::Duplicate
            } else {
                SkipReason::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
            };
            return Ok(reason);
        }
    }
    Err(err)
}

fn insert_row(conn: &Connection, record: &CanonicalRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO transactions (
            transaction_date, description, amount, fee, currency,
            type, balance, source, tx_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.transaction_date.format("%Y-%m-%d").to_string(),
            record.description,
            record.amount.to_string(),
            record.fee.to_string(),
            record.currency,
            record.tx_type,
            record.balance.to_string(),
            record.source,
            record.tx_hash,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert one row inside its own savepoint.
///
/// Constraint failures roll back to the savepoint and come back as
/// `Skipped`; any other error is returned and aborts the batch.
fn insert_isolated(
    tx: &mut rusqlite::Transaction<'_>,
    record: &CanonicalRecord,
) -> Result<RowOutcome, rusqlite::Error> {
    let sp = tx.savepoint()?;

    match insert_row(&sp, record) {
        Ok(id) => {
            sp.commit()?;
            Ok(RowOutcome::Inserted { id })
        }
        Err(err) => {
            // dropping the savepoint rolls it back
            drop(sp);
            classify_failure(err).map(RowOutcome::Skipped)
        }
    }
}

// ============================================================================
// BATCH WRITER
// ============================================================================

/// Persist a batch. Rows are attempted in order; each one ends up inserted
/// or skipped with a reason. Returns counts and skip details.
///
/// The batch takes the write lock up front (`BEGIN IMMEDIATE`), so both
/// row counts see only this batch's changes. Any error, including a failed
/// consistency check, drops the outer transaction and nothing from this
/// batch is kept; once committed the call always returns `Ok`.
pub fn write_batch(
    conn: &mut Connection,
    records: &[CanonicalRecord],
) -> Result<WriteReport, IngestError> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let before = verify_count(&tx)?;

    let mut report = WriteReport::default();

    for record in records {
        debug_assert_eq!(
            record.tx_hash,
            record_tx_hash(record),
            "tx_hash out of date for {}",
            record.origin
        );
        report.attempted += 1;

        match insert_isolated(&mut tx, record)? {
            RowOutcome::Inserted { id } => {
                debug!(id, tx_hash = %record.tx_hash, origin = %record.origin, "row inserted");
                report.inserted += 1;
            }
            RowOutcome::Skipped(reason) => {
                warn!(
                    tx_hash = %record.tx_hash,
                    origin = %record.origin,
                    row = %record.summary(),
                    reason = %reason,
                    "row skipped"
                );
                report.skipped.push(SkippedRow::from_record(record, reason));
            }
        }
    }

    // Consistency pass: the table grew by exactly what we inserted
    let after = verify_count(&tx)?;
    let expected = before + report.inserted as i64;
    if after != expected {
        return Err(IngestError::CountMismatch {
            expected,
            found: after,
        });
    }

    tx.commit()?;

    info!(
        attempted = report.attempted,
        inserted = report.inserted,
        skipped = report.skipped.len(),
        "batch committed"
    );

    Ok(report)
}

// ============================================================================
// READS
// ============================================================================

pub fn verify_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
}

fn column_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    // SQLite renders tiny REALs as "1.0e-06"
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn column_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Map a row selected with SELECT_COLUMNS
pub(crate) fn map_transaction(row: &Row<'_>) -> rusqlite::Result<PersistedTransaction> {
    Ok(PersistedTransaction {
        id: row.get(0)?,
        transaction_date: column_date(row, 1)?,
        description: row.get(2)?,
        amount: column_decimal(row, 3)?,
        fee: column_decimal(row, 4)?,
        currency: row.get(5)?,
        tx_type: row.get(6)?,
        category: row.get(7)?,
        balance: column_decimal(row, 8)?,
        source: row.get(9)?,
        tx_hash: row.get(10)?,
    })
}

/// Look up a persisted row by its fingerprint
pub fn get_transaction_by_hash(
    conn: &Connection,
    tx_hash: &str,
) -> Result<Option<PersistedTransaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE tx_hash = ?1", SELECT_COLUMNS);
    let tx = conn
        .query_row(&sql, [tx_hash], map_transaction)
        .optional()?;
    Ok(tx)
}

pub fn get_all_transactions(conn: &Connection) -> Result<Vec<PersistedTransaction>> {
    let sql = format!(
        "SELECT {} FROM transactions ORDER BY transaction_date DESC, id DESC",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let transactions = stmt
        .query_map([], map_transaction)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::compute_tx_hash;
    use crate::model::RowOrigin;
    use std::path::PathBuf;

    /// Helper to build canonical records with the fields tests care about
    fn create_test_record(date: &str, amount: &str, currency: &str, balance: &str) -> CanonicalRecord {
        let transaction_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        let mut amount = Decimal::from_str(amount).unwrap();
        let mut balance = Decimal::from_str(balance).unwrap();
        amount.rescale(6);
        balance.rescale(6);

        CanonicalRecord {
            transaction_date,
            description: "Test transaction".to_string(),
            amount,
            fee: Decimal::ZERO,
            currency: currency.to_string(),
            tx_type: "Card Payment".to_string(),
            balance,
            source: "revolut".to_string(),
            tx_hash: compute_tx_hash(transaction_date, &amount, currency, &balance),
            origin: RowOrigin {
                file: PathBuf::from("revolut_2024.csv"),
                line: 2,
            },
        }
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_db();
        setup_database(&conn).unwrap();
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_idempotency_import_twice() {
        let mut conn = test_db();

        let records = vec![
            create_test_record("2024-01-05", "-23.50", "PLN", "1000.00"),
            create_test_record("2024-01-06", "-120.50", "PLN", "879.50"),
            create_test_record("2024-01-07", "2000.00", "EUR", "2879.50"),
        ];

        let first = write_batch(&mut conn, &records).unwrap();
        assert_eq!(first.attempted, 3);
        assert_eq!(first.inserted, 3);
        assert!(first.skipped.is_empty());
        assert_eq!(verify_count(&conn).unwrap(), 3);

        let second = write_batch(&mut conn, &records).unwrap();
        assert_eq!(second.attempted, 3);
        assert_eq!(second.inserted, 0, "Second import should insert nothing");
        assert_eq!(second.duplicates(), 3);
        assert_eq!(verify_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_inside_batch_skipped_rest_kept() {
        let mut conn = test_db();

        let a = create_test_record("2024-01-05", "-23.50", "PLN", "1000.00");
        let mut a_again = a.clone();
        a_again.description = "different description".to_string();
        a_again.origin.line = 3;
        let b = create_test_record("2024-01-06", "-1.00", "PLN", "999.00");

        let report = write_batch(&mut conn, &[a.clone(), a_again, b]).unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::Duplicate);
        assert_eq!(report.skipped[0].origin.line, 3);
        assert_eq!(report.skipped[0].tx_hash, a.tx_hash);
        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_check_violation_isolated() {
        let mut conn = test_db();

        let good1 = create_test_record("2024-01-05", "-23.50", "PLN", "1000.00");
        let bad = create_test_record("2024-01-06", "-5.00", "USDT", "995.00");
        let good2 = create_test_record("2024-01-07", "-5.00", "PLN", "990.00");

        let report = write_batch(&mut conn, &[good1, bad, good2]).unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.constraint_violations(), 1);
        assert_eq!(report.skipped[0].currency, "USDT");
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::ConstraintViolation(_)
        ));
        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_oversized_type_rejected_by_check() {
        let mut conn = test_db();

        let mut rec = create_test_record("2024-01-05", "-23.50", "PLN", "1000.00");
        rec.tx_type = "t".repeat(51);

        let report = write_batch(&mut conn, &[rec]).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.constraint_violations(), 1);
    }

    #[test]
    fn test_round_trip_decimals_and_null_category() {
        let mut conn = test_db();
        let rec = create_test_record("2024-01-05", "-23.50", "PLN", "1000.00");

        write_batch(&mut conn, &[rec.clone()]).unwrap();

        let stored = get_transaction_by_hash(&conn, &rec.tx_hash).unwrap().unwrap();
        assert_eq!(stored.id, 1);
        assert_eq!(stored.transaction_date, rec.transaction_date);
        assert_eq!(stored.amount, Decimal::from_str("-23.5").unwrap());
        assert_eq!(stored.balance, Decimal::from_str("1000").unwrap());
        assert_eq!(stored.fee, Decimal::ZERO);
        assert_eq!(stored.category, None);
        assert_eq!(stored.source, "revolut");
    }

    #[test]
    fn test_ids_increase() {
        let mut conn = test_db();
        let records = vec![
            create_test_record("2024-01-05", "-1", "PLN", "10"),
            create_test_record("2024-01-06", "-2", "PLN", "8"),
        ];
        write_batch(&mut conn, &records).unwrap();

        let mut ids: Vec<i64> = get_all_transactions(&conn)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_missing_hash_lookup() {
        let conn = test_db();
        assert!(get_transaction_by_hash(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_writers_never_see_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let conn = open_database(&path).unwrap();
            setup_database(&conn).unwrap();
        }

        let other_path = path.clone();
        let other = std::thread::spawn(move || {
            let mut conn = open_database(&other_path).unwrap();
            for i in 0..100 {
                let rec = create_test_record("2024-02-01", "-2", "EUR", &i.to_string());
                let report = write_batch(&mut conn, &[rec]).unwrap();
                assert_eq!(report.inserted, 1);
            }
        });

        let mut conn = open_database(&path).unwrap();
        for i in 0..100 {
            let rec = create_test_record("2024-01-05", "-1", "PLN", &i.to_string());
            let report = write_batch(&mut conn, &[rec]).unwrap();
            assert_eq!(report.inserted, 1);
        }

        other.join().unwrap();
        assert_eq!(verify_count(&conn).unwrap(), 200);
    }

    #[test]
    fn test_storage_error_rolls_back_whole_batch() {
        let mut conn = test_db();
        write_batch(&mut conn, &[create_test_record("2024-01-01", "-1", "PLN", "99")]).unwrap();

        // abs(i64::MIN) raises a plain SQLITE_ERROR, not a constraint
        conn.execute_batch(
            "CREATE TRIGGER fail_on_boom BEFORE INSERT ON transactions
             WHEN NEW.description = 'boom'
             BEGIN SELECT abs(-9223372036854775807 - 1); END;",
        )
        .unwrap();

        let good = create_test_record("2024-01-05", "-23.50", "PLN", "1000.00");
        let mut boom = create_test_record("2024-01-06", "-5.00", "PLN", "995.00");
        boom.description = "boom".to_string();
        let after = create_test_record("2024-01-07", "-5.00", "PLN", "990.00");

        let err = write_batch(&mut conn, &[good.clone(), boom, after]).unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
        assert_eq!(verify_count(&conn).unwrap(), 1);
        assert!(get_transaction_by_hash(&conn, &good.tx_hash).unwrap().is_none());

        // connection is still usable after the rollback
        let report = write_batch(&mut conn, &[good]).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_classify_non_constraint_error_propagates() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(classify_failure(err).is_err());
    }
}
