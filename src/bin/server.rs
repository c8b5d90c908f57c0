use std::{fs::OpenOptions, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{MatchedPath, Request},
};
use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use tally_rs::{
    AppState, DEFAULT_IDEMPOTENCY_RETENTION_DAYS, DEFAULT_RECURRING_HORIZON_MONTHS, LedgerConfig,
    build_router, get_local_offset, graceful_shutdown,
};

/// The REST API server for tally_rs.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// The canonical timezone name used to decide which recurring
    /// transactions are due, e.g. "Pacific/Auckland".
    #[arg(long, env = "LOCAL_TIMEZONE", default_value = "Etc/UTC")]
    local_timezone: String,

    /// File path to the debug log.
    #[arg(long, default_value = "debug.log")]
    log_path: String,

    /// How many months ahead open-ended recurring series are generated for.
    #[arg(long, default_value_t = DEFAULT_RECURRING_HORIZON_MONTHS)]
    recurring_horizon_months: u32,

    /// How many days idempotency keys are remembered for.
    #[arg(long, default_value_t = DEFAULT_IDEMPOTENCY_RETENTION_DAYS)]
    idempotency_retention_days: u32,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    setup_logging(&args.log_path);

    if get_local_offset(&args.local_timezone).is_none() {
        tracing::error!("Invalid timezone {}", args.local_timezone);
        return;
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let conn = Connection::open(&args.db_path).expect("Could not open the database.");
    let config = LedgerConfig::new(&args.local_timezone)
        .recurring_horizon_months(args.recurring_horizon_months)
        .idempotency_retention_days(args.idempotency_retention_days);
    let state = AppState::new(conn, config).expect("Could not initialize the database.");

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));
    tokio::spawn(prune_idempotency_records_daily(state.clone()));

    let router = add_tracing_layer(build_router(state));

    tracing::info!("HTTP server listening on {}", addr);
    if let Err(error) = axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
    {
        tracing::error!("Server stopped with an error: {error}");
    }
}

async fn prune_idempotency_records_daily(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    // The first tick completes immediately and startup has already pruned.
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Err(error) = state.prune_idempotency_records() {
            tracing::error!("Could not prune idempotency records: {error}");
        }
    }
}

fn setup_logging(log_path: &str) {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::INFO)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // Errors are logged by the handlers and the logging middleware.
        .on_failure(());

    router.layer(tracing_layer)
}
