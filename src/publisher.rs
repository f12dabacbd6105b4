// =============================================================================
// publisher.rs - THE RISK RECORD DEPARTURE LOUNGE
// =============================================================================
//
// The only thing that ever leaves this pipeline is a RiskRecord: one row per
// issuer per quarter, shaped like a loan so the dashboard can chart a BDC's
// non-accrual tally right next to the loans themselves.
//
// Two halves:
//
//   emit_record()  - pure mapping, ExtractionResult + quarter label -> record
//   RecordSink     - the storage collaborator, insert-or-ignore semantics
//
// The Redis sink stores each record in a hash keyed by its
// (borrower, fund, date_added) triple with HSETNX, so a second insert of the
// same triple is a no-op. Fresh inserts are also PUBLISHed for live
// consumers and ZADDed into a sorted set scored by date, because pub/sub is
// fire-and-forget and the dashboard likes to catch up after a nap.
// =============================================================================

use std::collections::HashSet;
use std::future::Future;

use chrono::Local;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StorageError;
use crate::models::{ExtractionResult, RiskRecord};

/// Every BDC record is filed under the same sector. BDC books span every
/// industry, and the per-loan sectors live in the loan table anyway.
pub const RISK_SECTOR: &str = "Diversified";

/// Map one quarter's extraction result to its persisted record.
///
/// A missing filing date becomes today's date.
pub fn emit_record(result: &ExtractionResult, quarter_label: &str) -> RiskRecord {
    RiskRecord {
        borrower: format!("{} {} distress signals", result.issuer.ticker, quarter_label),
        fund: result.issuer.name.clone(),
        sector: RISK_SECTOR.to_string(),
        cost: 0.0,
        fair_value: result.non_accrual_count as f64,
        date_added: result
            .filing_date
            .unwrap_or_else(|| Local::now().date_naive()),
    }
}

/// The storage collaborator. `Ok(true)` means the record was inserted,
/// `Ok(false)` means an identical triple was already stored and the record
/// was ignored.
pub trait RecordSink {
    fn save(&self, record: &RiskRecord) -> impl Future<Output = Result<bool, StorageError>>;
}

impl<K: RecordSink> RecordSink for &K {
    async fn save(&self, record: &RiskRecord) -> Result<bool, StorageError> {
        (**self).save(record).await
    }
}

/// Records without a borrower are refused by every sink.
fn check_required(record: &RiskRecord) -> Result<(), StorageError> {
    if record.borrower.trim().is_empty() {
        return Err(StorageError::Rejected("borrower is required".to_string()));
    }
    Ok(())
}

// =============================================================================
// Redis
// =============================================================================

pub struct RedisRecordSink {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    hash: String,
    channel: String,
    sorted_set: String,
}

impl RedisRecordSink {
    /// Validates the URL. The connection itself is opened on first save, and
    /// a failed connect is retried on the next one.
    pub fn new(config: &Config) -> Result<Self, StorageError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        info!(
            hash = config.redis_hash.as_str(),
            channel = config.redis_channel.as_str(),
            sorted_set = config.redis_sorted_set.as_str(),
            "Redis record sink configured"
        );
        Ok(Self {
            client,
            connection: OnceCell::new(),
            hash: config.redis_hash.clone(),
            channel: config.redis_channel.clone(),
            sorted_set: config.redis_sorted_set.clone(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StorageError> {
        let con = self
            .connection
            .get_or_try_init(|| async {
                let con = self.client.get_multiplexed_async_connection().await?;
                info!("Redis connection established");
                Ok::<_, StorageError>(con)
            })
            .await?;
        Ok(con.clone())
    }
}

impl RecordSink for RedisRecordSink {
    async fn save(&self, record: &RiskRecord) -> Result<bool, StorageError> {
        check_required(record)?;
        let mut con = self.connection().await?;
        let key = record.dedup_key();
        let json = serde_json::to_string(record)?;

        let inserted: bool = con.hset_nx(&self.hash, &key, &json).await?;
        if !inserted {
            debug!(key = key.as_str(), "Record already stored");
            return Ok(false);
        }

        // The record is stored at this point. Announcement failures are
        // logged but do not turn a successful insert into a failure.
        let score = record
            .date_added
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp() as f64)
            .unwrap_or_default();
        let persisted: redis::RedisResult<()> = con.zadd(&self.sorted_set, &json, score).await;
        if let Err(e) = persisted {
            warn!(key = key.as_str(), error = %e, "Failed to ZADD record to history");
        }
        let announced: redis::RedisResult<()> = con.publish(&self.channel, &json).await;
        if let Err(e) = announced {
            warn!(key = key.as_str(), error = %e, "Failed to PUBLISH record");
        }

        Ok(true)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Insert-or-ignore store that never leaves the process. Backs dry runs.
#[derive(Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<RiskRecord>>,
    keys: Mutex<HashSet<String>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records in insertion order.
    pub fn records(&self) -> Vec<RiskRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemoryRecordSink {
    async fn save(&self, record: &RiskRecord) -> Result<bool, StorageError> {
        check_required(record)?;
        if !self.keys.lock().insert(record.dedup_key()) {
            return Ok(false);
        }
        self.records.lock().push(record.clone());
        Ok(true)
    }
}
