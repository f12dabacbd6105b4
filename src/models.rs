// =============================================================================
// models.rs - THE LEDGER OF LOAN-BOOK MISERY
// =============================================================================
//
// The data structures that flow through the pipeline, leaves first:
//
//   Issuer -> FilingHandle -> ExtractionResult -> (series) -> RiskRecord
//
// Only the RiskRecord ever leaves the building. Everything else lives and
// dies inside one issuer's processing.
// =============================================================================

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A business-development company we track. Loaded from configuration and
/// never modified during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issuer {
    /// Exchange ticker, used in labels and reports.
    pub ticker: String,

    /// SEC Central Index Key, used to talk to EDGAR.
    pub cik: String,

    /// Human-readable name. Doubles as the `fund` on persisted records.
    pub name: String,
}

impl Issuer {
    pub fn new(ticker: impl Into<String>, cik: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            cik: cik.into(),
            name: name.into(),
        }
    }

    /// CIK left-padded to the ten digits the submissions API expects.
    pub fn padded_cik(&self) -> String {
        format!("{:0>10}", self.cik)
    }

    /// CIK with leading zeros stripped, as used in archive paths.
    pub fn archive_cik(&self) -> String {
        let trimmed = self.cik.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.ticker, self.name)
    }
}

/// A downloaded filing sitting in the local cache, waiting to be read.
///
/// Handles are transient: created by the fetcher, consumed by the date
/// resolver and the extractor, dropped when the issuer is done.
#[derive(Debug, Clone)]
pub struct FilingHandle {
    pub issuer: Issuer,

    /// Form type, e.g. "10-Q".
    pub filing_type: String,

    /// EDGAR accession identifier, e.g. "0001287750-24-000032".
    pub accession: String,

    /// Directory holding this filing's documents.
    pub location: PathBuf,

    /// When the documents were fetched (or found in the cache).
    pub retrieved_at: DateTime<Utc>,
}

/// Where a resolved filing date came from. Logged for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateSource {
    /// "FILED AS OF DATE" in the SEC header.
    FiledAsOf,
    /// "CONFORMED PERIOD OF REPORT" in the SEC header.
    ConformedPeriod,
    /// "DATE AS OF CHANGE" in the SEC header.
    DateAsOfChange,
    /// Estimated from the accession identifier's year and sequence number.
    AccessionEstimate,
    /// Nothing worked.
    Unknown,
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSource::FiledAsOf => write!(f, "FILED_AS_OF_DATE"),
            DateSource::ConformedPeriod => write!(f, "CONFORMED_PERIOD_OF_REPORT"),
            DateSource::DateAsOfChange => write!(f, "DATE_AS_OF_CHANGE"),
            DateSource::AccessionEstimate => write!(f, "ACCESSION_ESTIMATE"),
            DateSource::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Distress counts for one filing. Produced once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub issuer: Issuer,

    /// Accession of the filing this came from.
    pub accession: String,

    pub non_accrual_count: u64,
    pub payment_default_count: u64,

    /// Always `non_accrual_count + payment_default_count`.
    pub total_distress_count: u64,

    pub filing_date: Option<NaiveDate>,
    pub date_source: DateSource,
}

impl ExtractionResult {
    pub fn new(
        issuer: Issuer,
        accession: impl Into<String>,
        non_accrual_count: u64,
        payment_default_count: u64,
        filing_date: Option<NaiveDate>,
        date_source: DateSource,
    ) -> Self {
        Self {
            issuer,
            accession: accession.into(),
            non_accrual_count,
            payment_default_count,
            total_distress_count: non_accrual_count + payment_default_count,
            filing_date,
            date_source,
        }
    }
}

/// The classifier's verdict on an issuer's multi-quarter trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendSignal {
    InsufficientData,
    Deteriorating,
    Improving,
    Stable,
    NoData,
    Failed,
}

impl fmt::Display for TrendSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendSignal::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
            TrendSignal::Deteriorating => write!(f, "DETERIORATING"),
            TrendSignal::Improving => write!(f, "IMPROVING"),
            TrendSignal::Stable => write!(f, "STABLE"),
            TrendSignal::NoData => write!(f, "NO_DATA"),
            TrendSignal::Failed => write!(f, "FAILED"),
        }
    }
}

/// The persisted unit. Shaped like a row of the `bdc_loans` table the
/// dashboard already reads, so a quarter's distress tally shows up next to
/// the loan-level data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub borrower: String,
    pub fund: String,
    pub sector: String,
    pub cost: f64,
    pub fair_value: f64,
    pub date_added: NaiveDate,
}

impl RiskRecord {
    /// The triple storage enforces uniqueness on.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.borrower, self.fund, self.date_added.format("%Y-%m-%d"))
    }
}

impl fmt::Display for RiskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} on {} (fair_value={})",
            self.borrower, self.fund, self.date_added, self.fair_value
        )
    }
}

/// One line of the run report.
#[derive(Debug, Clone, Serialize)]
pub struct IssuerSummary {
    pub ticker: String,
    pub name: String,
    /// e.g. "Q1 2024(12) -> Q2 2024(15)"
    pub trend: String,
    pub signal: TrendSignal,
    pub records_saved: u64,
}

/// What a whole run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub issuers: Vec<IssuerSummary>,
    pub total_records_saved: u64,
}

// =============================================================================
// EDGAR submissions API wire types
// =============================================================================
// https://data.sec.gov/submissions/CIK##########.json returns the recent
// filings as parallel arrays. We only read the columns we need and default
// the rest, because the SEC adds fields whenever it feels like it.
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EdgarSubmissions {
    #[serde(default)]
    pub name: Option<String>,
    pub filings: EdgarFilings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgarFilings {
    pub recent: EdgarRecentFilings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgarRecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

/// One row pulled out of the parallel arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgarListing {
    pub accession: String,
    pub primary_document: Option<String>,
}

impl EdgarRecentFilings {
    /// The newest `limit` filings of `form`, in the order EDGAR lists them
    /// (newest first).
    pub fn latest_of_form(&self, form: &str, limit: usize) -> Vec<EdgarListing> {
        self.accession_number
            .iter()
            .enumerate()
            .filter(|(i, _)| self.form.get(*i).map(|f| f == form).unwrap_or(false))
            .take(limit)
            .map(|(i, accession)| EdgarListing {
                accession: accession.clone(),
                primary_document: self
                    .primary_document
                    .get(i)
                    .filter(|doc| !doc.is_empty())
                    .cloned(),
            })
            .collect()
    }
}
