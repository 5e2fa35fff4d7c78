// Ledger Ingest - Web Server
// Read-only REST API over the transactions table

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use ledger_ingest::queries::DEFAULT_LIMIT;
use ledger_ingest::{
    latest_transactions, month_totals, monthly_summary, open_database, query_transactions,
    setup_database, type_breakdown, TransactionFilter, VERSION,
};

#[derive(Parser)]
#[command(name = "ledger-server", version = VERSION, about = "Read-only API over the ledger database")]
struct Args {
    /// SQLite database file
    #[arg(long, env = "LEDGER_DB", default_value = "transactions.db")]
    db: PathBuf,

    /// Listen address
    #[arg(long, env = "LEDGER_ADDR", default_value = "127.0.0.1:3000")]
    addr: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Any handler failure becomes a 500 with the message in `error`
struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(format!("{:#}", err))
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Run a read against the shared connection
fn with_conn<T>(
    state: &AppState,
    read: impl FnOnce(&Connection) -> anyhow::Result<T>,
) -> ApiResult<T> {
    let conn = state
        .db
        .lock()
        .map_err(|_| ApiError("database lock poisoned".to_string()))?;
    Ok(Json(ApiResponse::ok(read(&conn)?)))
}

#[derive(Debug, Deserialize)]
struct LatestParams {
    currency: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MonthParams {
    currency: String,
    /// `YYYY-MM`
    month: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/transactions - Filtered transactions
async fn get_transactions(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> impl IntoResponse {
    with_conn(&state, |conn| query_transactions(conn, &filter))
}

/// GET /api/transactions/latest - Newest rows, optionally for one currency
async fn get_latest(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    with_conn(&state, |conn| {
        latest_transactions(conn, params.currency.as_deref(), limit)
    })
}

/// GET /api/summary/monthly - Income/expense/net per currency and month
async fn get_monthly_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> impl IntoResponse {
    with_conn(&state, |conn| {
        monthly_summary(conn, params.currency.as_deref())
    })
}

/// GET /api/summary/month - Totals for one currency and month
async fn get_month_totals(
    State(state): State<AppState>,
    Query(params): Query<MonthParams>,
) -> impl IntoResponse {
    with_conn(&state, |conn| {
        month_totals(conn, &params.currency, &params.month)
    })
}

/// GET /api/stats/types - Expenses by type for one currency and month
async fn get_type_stats(
    State(state): State<AppState>,
    Query(params): Query<MonthParams>,
) -> impl IntoResponse {
    with_conn(&state, |conn| {
        type_breakdown(conn, &params.currency, &params.month)
    })
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/transactions", get(get_transactions))
        .route("/transactions/latest", get(get_latest))
        .route("/summary/monthly", get(get_monthly_summary))
        .route("/summary/month", get(get_month_totals))
        .route("/stats/types", get(get_type_stats))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args = Args::parse();

    println!("🌐 Ledger Ingest v{} - Web Server", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&args.db)?;
    setup_database(&conn)?;
    info!(db = %args.db.display(), "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;

    println!("\n🚀 Server running on http://{}", args.addr);
    println!("   API: http://{}/api/transactions", args.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app(state))
        .await
        .context("Server stopped with an error")?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
