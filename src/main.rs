use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clubdesk::member::MembershipRecord;
use clubdesk::queue::{AnnotationQueue, QueueConfig};
use clubdesk::store::{MemStore, SheetStore};
use clubdesk::{ai, api, AppState, SharedStore};

#[derive(Parser)]
#[command(name = "clubdesk", version, about = "Membership dashboard core service")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "4117", env = "CLUBDESK_PORT")]
    port: u16,

    /// Base URL of the spreadsheet record service
    #[arg(long, env = "CLUBDESK_SHEET_URL")]
    sheet_url: Option<String>,

    /// Run against an in-memory demo dataset instead of a sheet service
    #[arg(long, env = "CLUBDESK_DEMO")]
    demo: bool,

    /// Debounce before an annotation batch write, in ms
    #[arg(long, default_value = "2000", env = "CLUBDESK_FLUSH_DEBOUNCE_MS")]
    flush_debounce_ms: u64,

    /// Backoff before retrying a failed batch write, in ms
    #[arg(long, default_value = "5000", env = "CLUBDESK_FLUSH_RETRY_MS")]
    flush_retry_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let store: SharedStore = if args.demo {
        info!("demo mode: in-memory record store");
        Arc::new(MemStore::new(demo_records()))
    } else {
        let Some(ref url) = args.sheet_url else {
            eprintln!("either --sheet-url (CLUBDESK_SHEET_URL) or --demo is required");
            std::process::exit(2);
        };
        let sheet_key = std::env::var("CLUBDESK_SHEET_KEY").ok();
        match SheetStore::new(url, sheet_key) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("failed to build sheet client: {e}");
                std::process::exit(2);
            }
        }
    };

    let ai_cfg = ai::AiConfig::from_env();
    let ai_status = match &ai_cfg {
        Some(cfg) if cfg.demo => "demo".to_string(),
        Some(cfg) => format!("model={}", cfg.llm_model),
        None => "disabled".into(),
    };

    let api_key = std::env::var("CLUBDESK_API_KEY").ok();
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let queue_cfg = QueueConfig {
        debounce: Duration::from_millis(args.flush_debounce_ms),
        retry_backoff: Duration::from_millis(args.flush_retry_ms),
    };
    let (queue, _worker) = AnnotationQueue::spawn(store.clone(), queue_cfg);

    let state = AppState {
        store,
        queue: queue.clone(),
        ai: ai_cfg,
        api_key,
        started_at: std::time::Instant::now(),
    };
    let app = api::router(state);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        ai = %ai_status,
        auth = auth_status,
        "clubdesk starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Last chance for at-least-once delivery of pending annotation edits.
    match queue.flush().await {
        Ok(0) => {}
        Ok(n) => info!(edits = n, "flushed pending annotations on shutdown"),
        Err(e) => warn!(error = %e, "final annotation flush failed"),
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}

/// A handful of records so the dashboard has something to show in demo mode.
fn demo_records() -> Vec<MembershipRecord> {
    let today = chrono::Utc::now().date_naive();
    let end = |days: i64| (today + chrono::Duration::days(days)).format("%Y-%m-%d").to_string();

    let rec = |member_id: &str, first: &str, last: &str, status: &str, end_date: String,
               paid: &str, sessions: Option<i64>, comments: &str| {
        MembershipRecord {
            unique_id: format!("u-{member_id}"),
            member_id: member_id.into(),
            membership_id: format!("pl-{member_id}"),
            first_name: first.into(),
            last_name: last.into(),
            email: format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase()),
            membership_name: "Unlimited Monthly".into(),
            location: "Downtown".into(),
            end_date,
            paid: paid.into(),
            status: status.into(),
            sessions_left: sessions,
            comments: comments.into(),
            ..Default::default()
        }
    };

    vec![
        rec("M1", "Ana", "Silva", "Active", end(2), "12000", Some(2),
            "mentioned the price went up, considering other studios"),
        rec("M2", "Ben", "Okafor", "Active", end(10), "4500", Some(8), ""),
        rec("M3", "Carla", "Jones", "Churned", end(-15), "800", Some(0),
            "knee injury, had to stop coming"),
        rec("M4", "Dev", "Patel", "Active", end(45), "6200", Some(12), ""),
        rec("M5", "Emma", "Lindqvist", "Frozen", end(25), "3000", Some(4),
            "too busy at work this quarter"),
    ]
}
