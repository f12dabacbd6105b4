// ██████╗ ██████╗  ██████╗
// ██╔══██╗██╔══██╗██╔════╝
// ██████╔╝██║  ██║██║
// ██╔══██╗██║  ██║██║
// ██████╔╝██████╔╝╚██████╗
// ╚═════╝ ╚═════╝  ╚═════╝
//
// D I S T R E S S   E N G I N E
//
// Reads every quarterly report a business-development company files with the
// SEC, counts how often it admits a borrower stopped paying, and tells you
// whether that number is going up.
// Rust + Tokio + SIMD substring search + Aho-Corasick + Redis.
// All to find out which private-credit lender is quietly marking loans as
// non-accrual before the earnings call does it for them.

mod config;
mod date_resolver;
mod error;
mod fetcher;
mod metrics;
mod models;
mod orchestrator;
mod publisher;
mod retry;
mod series;
mod text_scanner;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::fetcher::EdgarFetcher;
use crate::metrics::RunContext;
use crate::orchestrator::Orchestrator;
use crate::publisher::{MemoryRecordSink, RecordSink, RedisRecordSink};
use crate::retry::TokioSleeper;

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║            ██████╗ ██████╗  ██████╗                              ║
    ║            ██╔══██╗██╔══██╗██╔════╝                              ║
    ║            ██████╔╝██║  ██║██║                                   ║
    ║            ██╔══██╗██║  ██║██║                                   ║
    ║            ██████╔╝██████╔╝╚██████╗                              ║
    ║            ╚═════╝ ╚═════╝  ╚═════╝                              ║
    ║                                                                  ║
    ║          BUSINESS-DEVELOPMENT COMPANY DISTRESS ENGINE            ║
    ║                                                                  ║
    ║   Source:   SEC EDGAR 10-Q filings                               ║
    ║   Signals:  non-accrual | payment default                        ║
    ║   Verdict:  DETERIORATING | IMPROVING | STABLE                   ║
    ║   Storage:  Redis (insert-or-ignore, pub/sub announced)          ║
    ║                                                                  ║
    ║   "Private credit is fine. Until it isn't."                      ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .init();
    }
}

/// Run the whole universe against one storage backend and report.
async fn run_universe<K: RecordSink>(config: &Config, sink: K, ctx: &RunContext) -> anyhow::Result<()> {
    let fetcher = EdgarFetcher::new(config, TokioSleeper)?;
    let orchestrator = Orchestrator::new(config, fetcher, sink, TokioSleeper);

    let summary = orchestrator.run(&config.universe, ctx).await;
    println!("\n{}\n", summary);

    let snapshot = ctx.snapshot();
    info!(
        metrics = serde_json::to_string(&snapshot)?.as_str(),
        "Run metrics"
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing(config::flag_from_env("BDC_RISK_LOG_JSON"));

    print_banner();

    let config = Config::from_env();
    info!(
        issuers = config.universe.len(),
        filing_type = config.filing_type.as_str(),
        quarters = config.quarter_count,
        cache_dir = %config.cache_dir.display(),
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    let ctx = RunContext::new();
    info!(run_id = %ctx.run_id(), "Run context created");

    let outcome = if config.dry_run {
        info!("Dry run: records stay in memory");
        let sink = MemoryRecordSink::new();
        let outcome = run_universe(&config, &sink, &ctx).await;
        if sink.is_empty() {
            warn!("Dry run produced no records");
        }
        for record in sink.records() {
            info!(record = %record, "Dry-run record");
        }
        info!(records = sink.len(), "Dry run finished, nothing written to Redis");
        outcome
    } else {
        let sink = RedisRecordSink::new(&config)?;
        run_universe(&config, sink, &ctx).await
    };

    if let Err(e) = &outcome {
        error!(error = %format!("{:#}", e), "Run aborted before completion");
    }
    outcome
}
