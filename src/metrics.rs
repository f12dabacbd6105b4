// ═══════════════════════════════════════════════════════════════
// RUN CONTEXT - everything one run needs to remember about itself
// ═══════════════════════════════════════════════════════════════
//
// One RunContext per orchestrator invocation. It carries the run id that
// tags every log line, a pile of atomic counters, and the ledger of
// (borrower, fund, date_added) triples already handed to storage, so the
// core never emits the same record twice in one run.
//
// Nothing in here is global. When the run ends, the context is dropped and
// the next run starts from zero.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// The metrics snapshot, serialized to JSON at the end of a run.
#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub fetch_attempts: u64,
    pub fetch_failures: u64,
    pub filings_fetched: u64,
    pub cache_hits: u64,
    pub extractions: u64,
    pub records_emitted: u64,
    pub records_saved: u64,
    pub records_skipped_in_run: u64,
    pub storage_duplicates: u64,
    pub storage_failures: u64,
    pub issuers_processed: u64,
    pub issuers_failed: u64,
}

pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    clock: Instant,

    fetch_attempts: AtomicU64,
    fetch_failures: AtomicU64,
    filings_fetched: AtomicU64,
    cache_hits: AtomicU64,
    extractions: AtomicU64,
    records_emitted: AtomicU64,
    records_saved: AtomicU64,
    records_skipped_in_run: AtomicU64,
    storage_duplicates: AtomicU64,
    storage_failures: AtomicU64,
    issuers_processed: AtomicU64,
    issuers_failed: AtomicU64,

    emitted: Mutex<HashSet<String>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            clock: Instant::now(),
            fetch_attempts: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            filings_fetched: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            extractions: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            records_saved: AtomicU64::new(0),
            records_skipped_in_run: AtomicU64::new(0),
            storage_duplicates: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            issuers_processed: AtomicU64::new(0),
            issuers_failed: AtomicU64::new(0),
            emitted: Mutex::new(HashSet::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn increment_fetch_attempts(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_filings_fetched(&self) {
        self.filings_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_extractions(&self) {
        self.extractions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_records_saved(&self) {
        self.records_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_storage_duplicates(&self) {
        self.storage_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_storage_failures(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_issuers_processed(&self) {
        self.issuers_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_issuers_failed(&self) {
        self.issuers_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Claim a record key for this run. Returns `true` the first time a key
    /// is seen and `false` on every repeat, which the caller must not emit.
    pub fn claim_record(&self, key: &str) -> bool {
        let fresh = self.emitted.lock().insert(key.to_string());
        if fresh {
            self.records_emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.records_skipped_in_run.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            run_id: self.run_id.to_string(),
            started_at: self.started_at,
            elapsed_seconds: self.clock.elapsed().as_secs(),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            filings_fetched: self.filings_fetched.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            records_skipped_in_run: self.records_skipped_in_run.load(Ordering::Relaxed),
            storage_duplicates: self.storage_duplicates.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            issuers_processed: self.issuers_processed.load(Ordering::Relaxed),
            issuers_failed: self.issuers_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
