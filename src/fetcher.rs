// =============================================================================
// fetcher.rs - THE SEC'S MOST PATIENT CUSTOMER
// =============================================================================
//
// Pulls the last N quarterly reports for one BDC out of SEC EDGAR and parks
// them on local disk where the date resolver and the extractor can read them.
//
// Two stops per issuer:
//
//   1. The submissions API:  {submissions}/CIK##########.json
//      A JSON blob listing every recent filing as parallel arrays. We keep
//      the rows whose form matches, newest N of them.
//
//   2. The archives, once per filing:
//      {archives}/{cik}/{accession without dashes}/{accession}.txt
//        The full submission text. Carries the SEC header block with the
//        FILED AS OF DATE line, which is the best date we will ever get.
//      {archives}/{cik}/{accession without dashes}/{primary document}
//        The human-readable 10-Q body, usually the biggest file.
//
// Everything lands under {cache}/{cik}/{filing type}/{accession}/. A filing
// counts as cached only when its directory holds the full submission and,
// if the listing names one, the primary document. Whatever is missing gets
// fetched on the next run. Re-running the pipeline on a fully cached quarter
// costs one listing request per issuer and nothing else.
//
// Every request goes through the retry policy. If the listing still fails
// after the last attempt we log it and report "no filings". The orchestrator
// treats that as a perfectly normal day at the SEC.
//
// SEC fair-access rules: a descriptive User-Agent, and no more than ten
// requests a second. We send one, then wait, then send the next one.
// =============================================================================

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::metrics::RunContext;
use crate::models::{EdgarListing, EdgarSubmissions, FilingHandle, Issuer};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};

/// Name the full submission text is stored under inside a filing directory.
pub const FULL_SUBMISSION_FILE: &str = "full-submission.txt";

/// The document-source capability the orchestrator depends on.
///
/// Implementations return up to `count` filings of `filing_type` for
/// `issuer`, ordered oldest to newest. Exhausted transient failures are
/// reported as an empty list, not an error. An `Err` means something is
/// broken locally (bad base URL, unwritable cache) and retrying won't help.
pub trait FilingSource {
    fn fetch(
        &self,
        issuer: &Issuer,
        filing_type: &str,
        count: usize,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<Vec<FilingHandle>, FetchError>>;
}

/// EDGAR over HTTPS, with an on-disk filing cache.
pub struct EdgarFetcher<S: Sleeper = TokioSleeper> {
    client: reqwest::Client,
    submissions_base: Url,
    archives_base: Url,
    cache_dir: PathBuf,
    request_delay: Duration,
    policy: RetryPolicy,
    sleeper: S,
}

impl<S: Sleeper> EdgarFetcher<S> {
    pub fn new(config: &Config, sleeper: S) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        let submissions_base = Url::parse(config.submissions_base_url.trim_end_matches('/'))?;
        let archives_base = Url::parse(config.archives_base_url.trim_end_matches('/'))?;

        info!(
            submissions = submissions_base.as_str(),
            archives = archives_base.as_str(),
            cache_dir = %config.cache_dir.display(),
            max_attempts = config.retry_max_attempts,
            "EDGAR fetcher ready"
        );

        Ok(Self {
            client,
            submissions_base,
            archives_base,
            cache_dir: config.cache_dir.clone(),
            request_delay: config.request_delay,
            policy: RetryPolicy::from_config(config),
            sleeper,
        })
    }

    fn listing_url(&self, issuer: &Issuer) -> Result<Url, FetchError> {
        Ok(Url::parse(&format!(
            "{}/CIK{}.json",
            self.submissions_base.as_str().trim_end_matches('/'),
            issuer.padded_cik()
        ))?)
    }

    fn document_url(&self, issuer: &Issuer, accession: &str, document: &str) -> Result<Url, FetchError> {
        Ok(Url::parse(&format!(
            "{}/{}/{}/{}",
            self.archives_base.as_str().trim_end_matches('/'),
            issuer.archive_cik(),
            accession.replace('-', ""),
            document
        ))?)
    }

    /// `{cache}/{cik}/{filing type}/{accession}`
    pub fn filing_dir(&self, issuer: &Issuer, filing_type: &str, accession: &str) -> PathBuf {
        self.cache_dir
            .join(issuer.padded_cik())
            .join(filing_type)
            .join(accession)
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        let body = self.get(url).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn pause(&self) {
        if !self.request_delay.is_zero() {
            self.sleeper.sleep(self.request_delay).await;
        }
    }

    /// The newest `count` filings of `filing_type`, newest first.
    async fn fetch_listing(
        &self,
        issuer: &Issuer,
        filing_type: &str,
        count: usize,
        ctx: &RunContext,
    ) -> Result<Vec<EdgarListing>, FetchError> {
        let url = self.listing_url(issuer)?;
        let url_ref = &url;
        let label = format!("{} submissions", issuer.ticker);

        let submissions: EdgarSubmissions = self
            .policy
            .run(&label, &self.sleeper, |attempt| {
                ctx.increment_fetch_attempts();
                debug!(ticker = issuer.ticker.as_str(), attempt = attempt, url = url_ref.as_str(), "Fetching filing listing");
                self.get_json(url_ref)
            })
            .await?;
        self.pause().await;

        let listings = submissions.filings.recent.latest_of_form(filing_type, count);
        debug!(
            ticker = issuer.ticker.as_str(),
            edgar_name = submissions.name.as_deref().unwrap_or(""),
            found = listings.len(),
            "Filing listing received"
        );
        Ok(listings)
    }

    /// Download one document into `dir` under `file_name`. Writes go through
    /// a `.part` file so a crash never leaves a half-written document that
    /// the cache check would mistake for a complete one.
    async fn download(
        &self,
        url: &Url,
        dir: &Path,
        file_name: &str,
        ctx: &RunContext,
    ) -> Result<PathBuf, FetchError> {
        let label = format!("document {}", file_name);
        let body = self
            .policy
            .run(&label, &self.sleeper, |attempt| {
                ctx.increment_fetch_attempts();
                debug!(attempt = attempt, url = url.as_str(), "Downloading document");
                async move { Ok::<_, FetchError>(self.get(url).await?.bytes().await?) }
            })
            .await;
        self.pause().await;
        let body = body?;

        let target = dir.join(file_name);
        let partial = dir.join(format!("{}.part", file_name));
        tokio::fs::write(&partial, &body)
            .await
            .map_err(|source| FetchError::Cache {
                path: partial.clone(),
                source,
            })?;
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|source| FetchError::Cache {
                path: target.clone(),
                source,
            })?;

        debug!(path = %target.display(), bytes = body.len(), "Document cached");
        Ok(target)
    }

    /// The documents a complete cached filing holds: the full submission
    /// text, plus the primary document when the listing names one.
    fn expected_documents(
        &self,
        issuer: &Issuer,
        listing: &EdgarListing,
    ) -> Result<Vec<(Url, String)>, FetchError> {
        let mut documents = vec![(
            self.document_url(issuer, &listing.accession, &format!("{}.txt", listing.accession))?,
            FULL_SUBMISSION_FILE.to_string(),
        )];
        if let Some(primary) = &listing.primary_document {
            // Primary documents occasionally carry a subdirectory. Only the
            // file name is kept locally.
            if let Some(name) = Path::new(primary).file_name().and_then(|n| n.to_str()) {
                documents.push((self.document_url(issuer, &listing.accession, primary)?, name.to_string()));
            }
        }
        Ok(documents)
    }

    /// Make sure one filing's documents are on disk. Only documents missing
    /// from the cache are downloaded, so a filing left half-fetched by an
    /// earlier run is completed rather than reused as is. Returns `None` when
    /// no document is available at all.
    async fn materialize(
        &self,
        issuer: &Issuer,
        filing_type: &str,
        listing: &EdgarListing,
        ctx: &RunContext,
    ) -> Result<Option<FilingHandle>, FetchError> {
        let dir = self.filing_dir(issuer, filing_type, &listing.accession);
        let documents = self.expected_documents(issuer, listing)?;
        let missing: Vec<&(Url, String)> = documents
            .iter()
            .filter(|(_, file_name)| !dir.join(file_name).is_file())
            .collect();

        if missing.is_empty() {
            ctx.increment_cache_hits();
            debug!(
                ticker = issuer.ticker.as_str(),
                accession = listing.accession.as_str(),
                "Filing already cached"
            );
            let retrieved_at = cached_at(&dir.join(FULL_SUBMISSION_FILE));
            return Ok(Some(self.handle(issuer, filing_type, listing, dir, retrieved_at)));
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FetchError::Cache {
                path: dir.clone(),
                source,
            })?;

        let mut failed = 0usize;
        for (url, file_name) in missing.iter().copied() {
            match self.download(url, &dir, file_name, ctx).await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    failed += 1;
                    ctx.increment_fetch_failures();
                    warn!(
                        ticker = issuer.ticker.as_str(),
                        accession = listing.accession.as_str(),
                        document = file_name.as_str(),
                        error = %e,
                        "Document download failed"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if failed == documents.len() {
            warn!(
                ticker = issuer.ticker.as_str(),
                accession = listing.accession.as_str(),
                "No documents retrieved, skipping filing"
            );
            return Ok(None);
        }

        Ok(Some(self.handle(issuer, filing_type, listing, dir, Utc::now())))
    }

    fn handle(
        &self,
        issuer: &Issuer,
        filing_type: &str,
        listing: &EdgarListing,
        location: PathBuf,
        retrieved_at: DateTime<Utc>,
    ) -> FilingHandle {
        FilingHandle {
            issuer: issuer.clone(),
            filing_type: filing_type.to_string(),
            accession: listing.accession.clone(),
            location,
            retrieved_at,
        }
    }
}

/// When a cached document was written. Falls back to now when the file
/// system can't say.
fn cached_at(document: &Path) -> DateTime<Utc> {
    std::fs::metadata(document)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

impl<S: Sleeper> FilingSource for EdgarFetcher<S> {
    async fn fetch(
        &self,
        issuer: &Issuer,
        filing_type: &str,
        count: usize,
        ctx: &RunContext,
    ) -> Result<Vec<FilingHandle>, FetchError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let listings = match self.fetch_listing(issuer, filing_type, count, ctx).await {
            Ok(listings) => listings,
            Err(e) if e.is_transient() => {
                ctx.increment_fetch_failures();
                error!(
                    ticker = issuer.ticker.as_str(),
                    cik = issuer.cik.as_str(),
                    error = %e,
                    "Filing listing unavailable after retries, continuing with no filings"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        // EDGAR lists newest first. The pipeline wants oldest first.
        let mut handles = Vec::with_capacity(listings.len());
        for listing in listings.iter().rev() {
            if let Some(handle) = self.materialize(issuer, filing_type, listing, ctx).await? {
                ctx.increment_filings_fetched();
                handles.push(handle);
            }
        }

        info!(
            ticker = issuer.ticker.as_str(),
            filing_type = filing_type,
            requested = count,
            listed = listings.len(),
            retrieved = handles.len(),
            "Filings ready"
        );
        Ok(handles)
    }
}
