use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use ledger_ingest::{
    close_database, monthly_summary, open_database, run_import, setup_database, verify_count,
    BatchReport, VERSION,
};

#[derive(Parser)]
#[command(name = "ledger-ingest", version = VERSION, about = "Import bank-export CSV files into SQLite")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "LEDGER_DB", default_value = "transactions.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the transactions table (no-op if it exists)
    Init,
    /// Import a CSV file or every .csv under a directory
    Import {
        /// File or directory
        input: PathBuf,
        /// Print the full batch report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Row count and per-month totals
    Stats {
        /// Only this currency
        #[arg(long)]
        currency: Option<String>,
    },
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init => run_init(&cli.db),
        Command::Import { input, json } => run_import_cmd(&cli.db, &input, json),
        Command::Stats { currency } => run_stats(&cli.db, currency.as_deref()),
    }
}

/// Close the handle whatever `result` is. The command's own error wins;
/// a close failure is only returned when the command succeeded.
fn close_after<T>(conn: Connection, result: Result<T>) -> Result<T> {
    match (result, close_database(conn)) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            error!(error = %format!("{:#}", close_err), "database close failed after error");
            Err(err)
        }
    }
}

fn run_init(db_path: &Path) -> Result<()> {
    let conn = open_database(db_path)?;
    let result = setup_database(&conn);
    close_after(conn, result)?;
    println!("✓ Database initialized: {}", db_path.display());
    Ok(())
}

fn run_import_cmd(db_path: &Path, input: &Path, json: bool) -> Result<()> {
    if !json {
        println!("🗄️  Import: {} → {}", input.display(), db_path.display());
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Storage handle lives for exactly this batch
    let mut conn = open_database(db_path)?;
    let result = setup_database(&conn).and_then(|()| {
        run_import(&mut conn, input)
            .with_context(|| format!("Import of {} failed", input.display()))
    });
    let report = close_after(conn, result)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    println!("\n📂 Files");
    for file in &report.files {
        match &file.error {
            Some(err) => println!("  ✗ {} - {}", file.path.display(), err),
            None => println!(
                "  ✓ {} [{}] {} rows, {} accepted",
                file.path.display(),
                file.source,
                file.rows_read,
                file.rows_accepted
            ),
        }
        for field in &file.missing_columns {
            println!("      ⚠ missing column: {}", field);
        }
    }

    if !report.rejections.is_empty() {
        println!("\n🚫 Rejected (no usable date): {}", report.rejected());
        for r in &report.rejections {
            println!(
                "  {} date={:?} completed={:?}",
                r.origin, r.primary_date, r.fallback_date
            );
        }
    }

    if !report.numeric_fallbacks.is_empty() {
        println!("\n🔢 Numeric values defaulted to 0: {}", report.numeric_fallbacks.len());
        for n in &report.numeric_fallbacks {
            println!("  {} {} = {:?}", n.origin, n.field, n.raw);
        }
    }

    if !report.currency_anomalies.is_empty() {
        println!("\n💱 Unexpected currencies: {}", report.currency_anomalies.len());
        for a in &report.currency_anomalies {
            println!("  {} {:?}", a.origin, a.currency);
        }
    }

    if !report.duplicate_fingerprints.is_empty() {
        println!("\n🔁 Duplicate fingerprints in batch: {}", report.duplicate_fingerprints.len());
        for g in &report.duplicate_fingerprints {
            let origins: Vec<String> = g.origins.iter().map(|o| o.to_string()).collect();
            println!("  {} ← {}", g.tx_hash, origins.join(", "));
        }
    }

    if !report.write.skipped.is_empty() {
        println!("\n⏭️  Skipped at write: {}", report.skipped());
        for s in &report.write.skipped {
            println!(
                "  {} {} {} {} {} ({}) - {}",
                s.origin, s.transaction_date, s.amount, s.currency, s.balance, s.tx_hash, s.reason
            );
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Attempted: {}", report.write.attempted);
    println!("✓ Inserted: {}", report.write.inserted);
    println!("✓ Rejected: {}", report.rejected());
    println!("✓ Skipped: {} ({} duplicates)", report.skipped(), report.write.duplicates());
    if report.is_accounted() {
        println!("✅ All {} input rows accounted for", report.input_rows());
    } else {
        println!("❌ Row accounting mismatch: {}", report.summary());
    }
}

fn print_stats(conn: &Connection, db_path: &Path, currency: Option<&str>) -> Result<()> {
    setup_database(conn)?;

    let count = verify_count(conn)?;
    println!("📊 {} transactions in {}", count, db_path.display());

    for m in monthly_summary(conn, currency)? {
        println!(
            "  {} {}  income {}  expense {}  net {}  ({} rows)",
            m.month, m.currency, m.income, m.expense, m.net_flow, m.transaction_count
        );
    }

    Ok(())
}

fn run_stats(db_path: &Path, currency: Option<&str>) -> Result<()> {
    let conn = open_database(db_path)?;
    let result = print_stats(&conn, db_path, currency);
    close_after(conn, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_close_after_keeps_command_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = close_after::<()>(conn, Err(anyhow!("import blew up"))).unwrap_err();
        assert_eq!(err.to_string(), "import blew up");
    }

    #[test]
    fn test_close_after_passes_value_through() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(close_after(conn, Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_stats_closes_database_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let conn = open_database(&path).unwrap();
            conn.execute_batch("CREATE TABLE transactions (id INTEGER)").unwrap();
        }

        // monthly_summary fails on the foreign table; the file must not stay locked
        assert!(run_stats(&path, None).is_err());
        let conn = open_database(&path).unwrap();
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;").unwrap();
    }
}
