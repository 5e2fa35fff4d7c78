// 🚚 Batch Runner - files → reconcile → normalize → fingerprint → write
//
// One run = one batch. Files are read fully before anything is written; a
// file that can't be read is reported and skipped, the others continue.

use crate::columns::{reconcile, source_from_file_name, ColumnMapping};
use crate::db::write_batch;
use crate::error::IngestError;
use crate::fingerprint::find_duplicate_fingerprints;
use crate::model::{CanonicalRecord, RawRecord, RowOrigin};
use crate::normalize::RecordNormalizer;
use crate::report::{BatchReport, FileReport};
use csv::ReaderBuilder;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

// ============================================================================
// DISCOVERY
// ============================================================================

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Result of walking the input: readable `.csv` paths plus entries the
/// walk could not get into (reported as failed files)
#[derive(Debug, Default)]
pub struct Discovered {
    pub files: Vec<PathBuf>,
    pub unreadable: Vec<FileReport>,
}

/// All `.csv` files under `input` (recursive, following symlinks), sorted
/// by path. A file path is returned as-is.
pub fn discover_csv_files(input: &Path) -> Result<Discovered, IngestError> {
    if input.is_file() {
        return Ok(Discovered {
            files: vec![input.to_path_buf()],
            unreadable: Vec::new(),
        });
    }
    if !input.is_dir() {
        return Err(IngestError::InputNotFound(input.to_path_buf()));
    }

    let mut found = Discovered::default();
    for entry in WalkDir::new(input).follow_links(true) {
        match entry {
            Ok(entry) if entry.file_type().is_file() && has_csv_extension(entry.path()) => {
                found.files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(input).to_path_buf();
                warn!(path = %path.display(), error = %e, "directory entry unreadable");
                found.unreadable.push(FileReport::failed(
                    path.clone(),
                    source_from_file_name(&path),
                    e.to_string(),
                ));
            }
        }
    }

    found.files.sort();
    Ok(found)
}

// ============================================================================
// READING
// ============================================================================

/// One file after reading and header reconciliation
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub source: String,
    pub mapping: ColumnMapping,
    pub rows: Vec<RawRecord>,
}

/// `;` when the header uses it more than `,`
fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or("");
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Read a CSV file into raw records. Any read/decode failure makes the
/// whole file unreadable; no partial file enters the batch.
pub fn load_file(path: &Path) -> Result<LoadedFile, IngestError> {
    let content = fs::read_to_string(path).map_err(|e| IngestError::unreadable(path, e))?;
    let content = content.trim_start_matches('\u{feff}');

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(sniff_delimiter(content))
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::unreadable(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::unreadable(path, "missing header row"));
    }

    let label = path.display().to_string();
    let mapping = reconcile(&headers, &label);
    let source = source_from_file_name(path);

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            IngestError::unreadable(path, format!("line {}: {}", idx + 2, e))
        })?;

        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();

        rows.push(RawRecord::new(
            RowOrigin {
                file: path.to_path_buf(),
                line: record.position().map(|p| p.line() as usize).unwrap_or(idx + 2),
            },
            cells,
        ));
    }

    Ok(LoadedFile {
        path: path.to_path_buf(),
        source,
        mapping,
        rows,
    })
}

// ============================================================================
// BATCH
// ============================================================================

/// Normalize one loaded file into `records`, recording findings in `report`
fn normalize_file(loaded: &LoadedFile, records: &mut Vec<CanonicalRecord>, report: &mut BatchReport) {
    let normalizer = RecordNormalizer::new(&loaded.mapping, loaded.source.clone());
    let mut accepted = 0;

    for raw in &loaded.rows {
        match normalizer.normalize(raw) {
            Ok(normalized) => {
                for note in normalized.notes {
                    report.record_note(note);
                }
                records.push(normalized.record);
                accepted += 1;
            }
            Err(rejection) => report.rejections.push(rejection),
        }
    }

    info!(
        file = %loaded.path.display(),
        source = %loaded.source,
        rows = loaded.rows.len(),
        accepted,
        rejected = loaded.rows.len() - accepted,
        "file normalized"
    );

    report.files.push(FileReport {
        path: loaded.path.clone(),
        source: loaded.source.clone(),
        rows_read: loaded.rows.len(),
        rows_accepted: accepted,
        missing_columns: loaded.mapping.missing.clone(),
        error: None,
    });
}

/// Read and normalize every file of the batch. Nothing is written.
pub fn prepare_batch(files: &[PathBuf]) -> (Vec<CanonicalRecord>, BatchReport) {
    let mut report = BatchReport::default();
    let mut records = Vec::new();

    for path in files {
        match load_file(path) {
            Ok(loaded) => normalize_file(&loaded, &mut records, &mut report),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "file skipped");
                report.files.push(FileReport::failed(
                    path.clone(),
                    source_from_file_name(path),
                    e.to_string(),
                ));
            }
        }
    }

    report.duplicate_fingerprints = find_duplicate_fingerprints(&records);
    (records, report)
}

/// Run one full ingestion batch over a file or directory.
///
/// The connection is owned by the caller; this only borrows it for the
/// duration of the write.
pub fn run_import(conn: &mut Connection, input: &Path) -> Result<BatchReport, IngestError> {
    let discovered = discover_csv_files(input)?;
    info!(
        input = %input.display(),
        files = discovered.files.len(),
        unreadable = discovered.unreadable.len(),
        "starting import"
    );

    let (records, mut report) = prepare_batch(&discovered.files);
    report.files.extend(discovered.unreadable);

    // records are handed over to storage here
    report.write = write_batch(conn, &records)?;

    if !report.is_accounted() {
        warn!(summary = %report.summary(), "row accounting does not balance");
    }
    info!(summary = %report.summary(), "import finished");

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::CanonicalField;
    use tempfile::tempdir;

    #[test]
    fn test_discover_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2024/jan")).unwrap();
        fs::write(dir.path().join("b_bank.csv"), "Date\n").unwrap();
        fs::write(dir.path().join("2024/jan/a_bank.CSV"), "Date\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let files = discover_csv_files(dir.path()).unwrap().files;

        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("2024/jan/a_bank.CSV"));
        assert!(files[1].ends_with("b_bank.csv"));
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_reports_unwalkable_entries() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("exports")).unwrap();
        fs::write(dir.path().join("exports/revolut_2024.csv"), "Date\n").unwrap();
        // a link back to an ancestor is a loop the walk cannot enter
        std::os::unix::fs::symlink(dir.path(), dir.path().join("exports/loop")).unwrap();

        let found = discover_csv_files(dir.path()).unwrap();

        assert_eq!(found.files.len(), 1);
        assert_eq!(found.unreadable.len(), 1);
        assert!(found.unreadable[0].is_failed());
        assert!(found.unreadable[0].path.ends_with("exports/loop"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_import_lists_unwalkable_entries_as_failed_files() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();
        fs::write(
            input.join("revolut_2024.csv"),
            "Date,Amount,Currency,Balance\n2024-01-05,-23.50,PLN,1000.00\n",
        )
        .unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), input.join("old.csv")).unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        crate::db::setup_database(&conn).unwrap();
        let report = run_import(&mut conn, &input).unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.failed_files().count(), 1);
        assert_eq!(report.write.inserted, 1);
        assert!(report.is_accounted());
    }

    #[test]
    fn test_discover_missing_path() {
        let err = discover_csv_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, IngestError::InputNotFound(_)));
    }

    #[test]
    fn test_load_file_semicolon_and_short_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pko_2024.csv");
        fs::write(
            &path,
            "\u{feff}Data operacji;Opis;Kwota;Waluta;Saldo po operacji\n\
             2024-01-05;Zabka;-23,50;PLN;1000,00\n\
             2024-01-06;Short row\n",
        )
        .unwrap();

        let loaded = load_file(&path).unwrap();

        assert_eq!(loaded.source, "pko");
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.rows[0].origin.line, 2);
        assert_eq!(loaded.rows[0].get("Kwota"), Some("-23,50"));
        assert_eq!(loaded.rows[1].get("Kwota"), None);
        assert!(loaded.mapping.is_mapped(CanonicalField::Balance));
    }

    #[test]
    fn test_load_file_invalid_utf8_is_unreadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad_2024.csv");
        fs::write(&path, [0x44, 0x61, 0x74, 0x65, 0x0a, 0xff, 0xfe, 0x0a]).unwrap();

        let err = load_file(&path).unwrap_err();
        assert!(matches!(err, IngestError::FileUnreadable { .. }));
    }

    #[test]
    fn test_prepare_batch_reports_failed_file_and_continues() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("revolut_2024.csv");
        let bad = dir.path().join("broken_2024.csv");
        fs::write(&good, "Date,Amount,Currency,Balance\n2024-01-05,-23.50,PLN,1000.00\n").unwrap();
        fs::write(&bad, [0xff, 0xfe, 0xfd]).unwrap();

        let (records, report) = prepare_batch(&[bad.clone(), good.clone()]);

        assert_eq!(records.len(), 1);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.failed_files().count(), 1);
        assert_eq!(report.input_rows(), 1);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("Opis;Kwota,x;y"), b';');
        assert_eq!(sniff_delimiter(""), b',');
    }
}
