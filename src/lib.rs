// Ledger Ingest - Core Library
// Bank-export CSV ingestion: reconcile columns, normalize, fingerprint, persist.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod columns;     // Column Reconciler
pub mod normalize;   // Record Normalizer
pub mod fingerprint; // Fingerprint Generator
pub mod db;          // Persistence Writer
pub mod pipeline;    // Batch Runner
pub mod report;
pub mod queries;     // Read side for the API server
pub mod model;
pub mod error;

// Re-export commonly used types
pub use columns::{
    reconcile, source_from_file_name, CanonicalField, ColumnMapping, MappedColumn,
};
pub use normalize::{parse_date, parse_decimal, Normalized, RecordNormalizer, ALLOWED_CURRENCIES};
pub use fingerprint::{compute_tx_hash, find_duplicate_fingerprints, record_tx_hash};
pub use db::{
    close_database, get_all_transactions, get_transaction_by_hash, open_database,
    setup_database, verify_count, write_batch, RowOutcome,
};
pub use pipeline::{
    discover_csv_files, load_file, prepare_batch, run_import, Discovered, LoadedFile,
};
pub use report::{
    BatchReport, CurrencyAnomaly, DuplicateGroup, FileReport, NumericFallback, Rejection,
    RowNote, SkipReason, SkippedRow, WriteReport,
};
pub use queries::{
    latest_transactions, month_totals, monthly_summary, query_transactions, type_breakdown,
    MonthTotals, MonthlySummary, TransactionFilter, TypeBreakdown,
};
pub use model::{CanonicalRecord, PersistedTransaction, RawRecord, RowOrigin};
pub use error::IngestError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
