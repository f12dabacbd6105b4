// =============================================================================
// orchestrator.rs - ONE BDC AT A TIME, NO EXCEPTIONS (WELL, CAUGHT ONES)
// =============================================================================
//
// Walks the configured universe of BDCs and drives each one through the
// pipeline:
//
//   FETCHING -> EXTRACTING -> CLASSIFYING -> SAVING -> DONE
//                                                   \-> FAILED (from anywhere)
//
// Issuers are processed strictly in sequence with a pause in between. EDGAR
// rate-limits anyone who gets excited, and there is nothing to gain from
// racing: a full universe run is a couple of minutes either way.
//
// A failure inside one issuer is caught right here, at the issuer boundary,
// and turns into a FAILED line in the summary. The run keeps going. Whatever
// records were already saved stay saved; each one is valid on its own.
// =============================================================================

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fetcher::FilingSource;
use crate::metrics::RunContext;
use crate::models::{Issuer, IssuerSummary, RunSummary, TrendSignal};
use crate::publisher::{emit_record, RecordSink};
use crate::retry::{Sleeper, TokioSleeper};
use crate::series::{classify, QuarterlySeries};
use crate::text_scanner;

/// Where an issuer is in its trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Extracting,
    Classifying,
    Saving,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetching => write!(f, "FETCHING"),
            Stage::Extracting => write!(f, "EXTRACTING"),
            Stage::Classifying => write!(f, "CLASSIFYING"),
            Stage::Saving => write!(f, "SAVING"),
            Stage::Done => write!(f, "DONE"),
            Stage::Failed => write!(f, "FAILED"),
        }
    }
}

pub struct Orchestrator<F, K, S = TokioSleeper> {
    source: F,
    sink: K,
    sleeper: S,
    filing_type: String,
    quarter_count: usize,
    issuer_delay: Duration,
}

impl<F, K, S> Orchestrator<F, K, S>
where
    F: FilingSource,
    K: RecordSink,
    S: Sleeper,
{
    pub fn new(config: &Config, source: F, sink: K, sleeper: S) -> Self {
        Self {
            source,
            sink,
            sleeper,
            filing_type: config.filing_type.clone(),
            quarter_count: config.quarter_count,
            issuer_delay: config.issuer_delay,
        }
    }

    #[cfg(test)]
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Process every issuer in `universe`, in order. Never fails; the worst
    /// outcome is a summary full of FAILED lines.
    pub async fn run(&self, universe: &[Issuer], ctx: &RunContext) -> RunSummary {
        info!(
            run_id = %ctx.run_id(),
            issuers = universe.len(),
            filing_type = self.filing_type.as_str(),
            quarters = self.quarter_count,
            "Universe run starting"
        );

        let mut issuers = Vec::with_capacity(universe.len());
        for (i, issuer) in universe.iter().enumerate() {
            if i > 0 && !self.issuer_delay.is_zero() {
                debug!(delay_ms = self.issuer_delay.as_millis() as u64, "Pausing between issuers");
                self.sleeper.sleep(self.issuer_delay).await;
            }

            let summary = match self.process_issuer(issuer, ctx).await {
                Ok(summary) => {
                    ctx.increment_issuers_processed();
                    summary
                }
                Err(e) => {
                    ctx.increment_issuers_failed();
                    error!(
                        ticker = issuer.ticker.as_str(),
                        stage = %Stage::Failed,
                        error = %format!("{:#}", e),
                        "Issuer failed, continuing with the rest of the universe"
                    );
                    IssuerSummary {
                        ticker: issuer.ticker.clone(),
                        name: issuer.name.clone(),
                        trend: String::new(),
                        signal: TrendSignal::Failed,
                        records_saved: 0,
                    }
                }
            };
            issuers.push(summary);
        }

        let total_records_saved = issuers.iter().map(|s| s.records_saved).sum();
        let summary = RunSummary {
            run_id: ctx.run_id().to_string(),
            issuers,
            total_records_saved,
        };

        for line in &summary.issuers {
            info!(
                ticker = line.ticker.as_str(),
                signal = %line.signal,
                trend = line.trend.as_str(),
                records_saved = line.records_saved,
                "Issuer summary"
            );
        }
        info!(
            run_id = summary.run_id.as_str(),
            total_records_saved = summary.total_records_saved,
            "Universe run complete"
        );
        summary
    }

    async fn process_issuer(&self, issuer: &Issuer, ctx: &RunContext) -> anyhow::Result<IssuerSummary> {
        let stage = |stage: Stage| {
            debug!(ticker = issuer.ticker.as_str(), stage = %stage, "Stage transition");
        };

        stage(Stage::Fetching);
        let handles = self
            .source
            .fetch(issuer, &self.filing_type, self.quarter_count, ctx)
            .await
            .with_context(|| format!("{} failed while {}", issuer.ticker, Stage::Fetching))?;

        if handles.is_empty() {
            warn!(ticker = issuer.ticker.as_str(), "No filings retrieved");
            stage(Stage::Done);
            return Ok(IssuerSummary {
                ticker: issuer.ticker.clone(),
                name: issuer.name.clone(),
                trend: String::new(),
                signal: TrendSignal::NoData,
                records_saved: 0,
            });
        }

        stage(Stage::Extracting);
        let results = handles
            .iter()
            .map(|handle| {
                let result = text_scanner::extract(handle);
                ctx.increment_extractions();
                result
            })
            .collect();

        stage(Stage::Classifying);
        let series = QuarterlySeries::build(results, self.quarter_count);
        let signal = classify(&series.non_accrual_counts());
        let trend = series.trend_string();
        info!(
            ticker = issuer.ticker.as_str(),
            quarters = series.points().len(),
            trend = trend.as_str(),
            signal = %signal,
            "Issuer classified"
        );

        stage(Stage::Saving);
        let mut records_saved = 0u64;
        for point in series.points() {
            let record = emit_record(&point.result, &point.label);
            if !ctx.claim_record(&record.dedup_key()) {
                debug!(record = %record, "Record already emitted this run, skipping");
                continue;
            }

            match self.sink.save(&record).await {
                Ok(inserted) => {
                    records_saved += 1;
                    ctx.increment_records_saved();
                    if inserted {
                        debug!(record = %record, "Record stored");
                    } else {
                        ctx.increment_storage_duplicates();
                        debug!(record = %record, "Record already in storage, ignored");
                    }
                }
                Err(e) => {
                    ctx.increment_storage_failures();
                    warn!(
                        ticker = issuer.ticker.as_str(),
                        record = %record,
                        error = %e,
                        "Failed to save record"
                    );
                }
            }
        }

        stage(Stage::Done);
        Ok(IssuerSummary {
            ticker: issuer.ticker.clone(),
            name: issuer.name.clone(),
            trend,
            signal,
            records_saved,
        })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BDC distress run {}", self.run_id)?;
        writeln!(
            f,
            "{:<8} {:<28} {:<18} {:>6}  {}",
            "TICKER", "NAME", "SIGNAL", "SAVED", "TREND"
        )?;
        for line in &self.issuers {
            let trend = if line.trend.is_empty() { "-" } else { line.trend.as_str() };
            writeln!(
                f,
                "{:<8} {:<28} {:<18} {:>6}  {}",
                line.ticker,
                line.name,
                line.signal.to_string(),
                line.records_saved,
                trend
            )?;
        }
        write!(f, "Total records saved: {}", self.total_records_saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use chrono::Utc;
    use tempfile::TempDir;

    use crate::error::{FetchError, StorageError};
    use crate::models::{FilingHandle, RiskRecord};
    use crate::publisher::MemoryRecordSink;
    use crate::retry::tests::RecordingSleeper;

    /// Hands out pre-written filings. Tickers listed in `broken` fail with a
    /// cache error, which the fetcher contract treats as non-recoverable.
    struct CannedSource {
        filings: HashMap<String, Vec<FilingHandle>>,
        broken: Vec<String>,
    }

    impl FilingSource for CannedSource {
        async fn fetch(
            &self,
            issuer: &Issuer,
            _filing_type: &str,
            count: usize,
            _ctx: &RunContext,
        ) -> Result<Vec<FilingHandle>, FetchError> {
            if self.broken.contains(&issuer.ticker) {
                return Err(FetchError::Cache {
                    path: "/cache".into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            let mut handles = self.filings.get(&issuer.ticker).cloned().unwrap_or_default();
            handles.truncate(count);
            Ok(handles)
        }
    }

    /// Rejects any record whose borrower mentions `poison`.
    struct PickySink {
        inner: MemoryRecordSink,
        poison: &'static str,
    }

    impl RecordSink for PickySink {
        async fn save(&self, record: &RiskRecord) -> Result<bool, StorageError> {
            if record.borrower.contains(self.poison) {
                return Err(StorageError::Rejected("constraint violation".to_string()));
            }
            self.inner.save(record).await
        }
    }

    fn issuer(ticker: &str) -> Issuer {
        Issuer::new(ticker, "0001287750", format!("{} Capital", ticker))
    }

    /// Write one filing directory with `count` non-accrual mentions and a
    /// FILED AS OF DATE header.
    fn filing(root: &Path, issuer: &Issuer, accession: &str, filed: &str, count: usize) -> FilingHandle {
        let dir = root.join(&issuer.ticker).join(accession);
        fs::create_dir_all(&dir).unwrap();
        let body = format!("FILED AS OF DATE: {}\n{}", filed, "non-accrual loan. ".repeat(count));
        fs::write(dir.join("full-submission.txt"), body).unwrap();
        FilingHandle {
            issuer: issuer.clone(),
            filing_type: "10-Q".to_string(),
            accession: accession.to_string(),
            location: dir,
            retrieved_at: Utc::now(),
        }
    }

    fn arcc_quarters(root: &TempDir) -> Vec<FilingHandle> {
        let arcc = issuer("ARCC");
        vec![
            filing(root.path(), &arcc, "0001287750-24-000010", "20240215", 5),
            filing(root.path(), &arcc, "0001287750-24-000020", "20240501", 6),
            filing(root.path(), &arcc, "0001287750-24-000030", "20240801", 7),
            filing(root.path(), &arcc, "0001287750-24-000040", "20241101", 20),
        ]
    }

    fn test_config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn test_full_run_classifies_and_saves() {
        let root = tempfile::tempdir().unwrap();
        let source = CannedSource {
            filings: HashMap::from([("ARCC".to_string(), arcc_quarters(&root))]),
            broken: Vec::new(),
        };
        let orchestrator = Orchestrator::new(
            &test_config(),
            source,
            MemoryRecordSink::new(),
            RecordingSleeper::default(),
        );
        let ctx = RunContext::new();

        let summary = orchestrator.run(&[issuer("ARCC"), issuer("MAIN")], &ctx).await;

        let arcc = &summary.issuers[0];
        assert_eq!(arcc.signal, TrendSignal::Deteriorating);
        assert_eq!(arcc.records_saved, 4);
        assert_eq!(
            arcc.trend,
            "Q1 2024(5) -> Q2 2024(6) -> Q3 2024(7) -> Q4 2024(20)"
        );

        let main = &summary.issuers[1];
        assert_eq!(main.signal, TrendSignal::NoData);
        assert_eq!(main.records_saved, 0);

        assert_eq!(summary.total_records_saved, 4);
        assert_eq!(orchestrator.sink().len(), 4);
        assert_eq!(orchestrator.sink().records()[3].fair_value, 20.0);

        // One pause, between the two issuers, none after the last.
        assert_eq!(*orchestrator.sleeper.delays.borrow(), vec![Duration::from_secs(3)]);

        let snap = ctx.snapshot();
        assert_eq!(snap.extractions, 4);
        assert_eq!(snap.issuers_processed, 2);
    }

    #[tokio::test]
    async fn test_failed_issuer_does_not_stop_the_run() {
        let root = tempfile::tempdir().unwrap();
        let source = CannedSource {
            filings: HashMap::from([("ARCC".to_string(), arcc_quarters(&root))]),
            broken: vec!["FSK".to_string()],
        };
        let orchestrator = Orchestrator::new(
            &test_config(),
            source,
            MemoryRecordSink::new(),
            RecordingSleeper::default(),
        );
        let ctx = RunContext::new();

        let summary = orchestrator.run(&[issuer("FSK"), issuer("ARCC")], &ctx).await;

        assert_eq!(summary.issuers[0].signal, TrendSignal::Failed);
        assert_eq!(summary.issuers[0].records_saved, 0);
        assert_eq!(summary.issuers[1].signal, TrendSignal::Deteriorating);
        assert_eq!(summary.total_records_saved, 4);

        let snap = ctx.snapshot();
        assert_eq!(snap.issuers_failed, 1);
        assert_eq!(snap.issuers_processed, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_isolated_to_one_record() {
        let root = tempfile::tempdir().unwrap();
        let source = CannedSource {
            filings: HashMap::from([("ARCC".to_string(), arcc_quarters(&root))]),
            broken: Vec::new(),
        };
        let sink = PickySink {
            inner: MemoryRecordSink::new(),
            poison: "Q2 2024",
        };
        let orchestrator = Orchestrator::new(&test_config(), source, sink, RecordingSleeper::default());
        let ctx = RunContext::new();

        let summary = orchestrator.run(&[issuer("ARCC")], &ctx).await;

        assert_eq!(summary.issuers[0].records_saved, 3);
        assert_eq!(orchestrator.sink().inner.len(), 3);
        assert_eq!(ctx.snapshot().storage_failures, 1);
    }

    #[tokio::test]
    async fn test_same_triple_is_emitted_once_per_run() {
        let root = tempfile::tempdir().unwrap();
        let arcc = issuer("ARCC");
        // Two filings landing on the same day produce the same label and date.
        let handles = vec![
            filing(root.path(), &arcc, "0001287750-24-000020", "20240501", 6),
            filing(root.path(), &arcc, "0001287750-24-000021", "20240501", 9),
        ];
        let source = CannedSource {
            filings: HashMap::from([("ARCC".to_string(), handles)]),
            broken: Vec::new(),
        };
        let orchestrator = Orchestrator::new(
            &test_config(),
            source,
            MemoryRecordSink::new(),
            RecordingSleeper::default(),
        );

        let ctx = RunContext::new();
        let summary = orchestrator.run(&[arcc.clone()], &ctx).await;
        assert_eq!(summary.issuers[0].records_saved, 1);
        assert_eq!(ctx.snapshot().records_skipped_in_run, 1);

        // A second run hits storage idempotence instead and does not crash.
        let rerun = RunContext::new();
        let summary = orchestrator.run(&[arcc], &rerun).await;
        assert_eq!(summary.issuers[0].records_saved, 1);
        assert_eq!(rerun.snapshot().storage_duplicates, 1);
        assert_eq!(orchestrator.sink().len(), 1);
    }

    #[tokio::test]
    async fn test_single_quarter_is_insufficient_data() {
        let root = tempfile::tempdir().unwrap();
        let arcc = issuer("ARCC");
        let source = CannedSource {
            filings: HashMap::from([(
                "ARCC".to_string(),
                vec![filing(root.path(), &arcc, "0001287750-24-000020", "20240501", 6)],
            )]),
            broken: Vec::new(),
        };
        let orchestrator = Orchestrator::new(
            &test_config(),
            source,
            MemoryRecordSink::new(),
            RecordingSleeper::default(),
        );

        let summary = orchestrator.run(&[arcc], &RunContext::new()).await;
        assert_eq!(summary.issuers[0].signal, TrendSignal::InsufficientData);
        assert_eq!(summary.issuers[0].records_saved, 1);
    }

    #[test]
    fn test_summary_table_contains_every_field() {
        let summary = RunSummary {
            run_id: "run-1".to_string(),
            issuers: vec![
                IssuerSummary {
                    ticker: "ARCC".to_string(),
                    name: "Ares Capital Corp".to_string(),
                    trend: "Q1 2024(12) -> Q2 2024(15)".to_string(),
                    signal: TrendSignal::Deteriorating,
                    records_saved: 2,
                },
                IssuerSummary {
                    ticker: "PSEC".to_string(),
                    name: "Prospect Capital Corp".to_string(),
                    trend: String::new(),
                    signal: TrendSignal::Failed,
                    records_saved: 0,
                },
            ],
            total_records_saved: 2,
        };

        let table = summary.to_string();
        assert!(table.contains("ARCC"));
        assert!(table.contains("Ares Capital Corp"));
        assert!(table.contains("Q1 2024(12) -> Q2 2024(15)"));
        assert!(table.contains("DETERIORATING"));
        assert!(table.contains("FAILED"));
        assert!(table.ends_with("Total records saved: 2"));
    }
}
