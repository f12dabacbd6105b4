// =============================================================================
// config.rs - THE CONTROL PANEL
// =============================================================================
//
// Every knob the pipeline exposes lives here. All values come from
// environment variables prefixed with BDC_RISK_, with defaults that work
// out of the box against the real SEC EDGAR endpoints.
//
// The retry numbers (3 attempts, 2s floor, 10s ceiling, multiplier 1) and the
// 3 second pause between issuers are what EDGAR tolerates without sending
// us to the penalty box. Go faster at your own risk.
// =============================================================================

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::models::Issuer;

/// Everything tunable about a run.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // EDGAR
    // =========================================================================

    /// The SEC insists on a descriptive User-Agent with contact details.
    pub user_agent: String,

    /// Base URL of the submissions API (`CIK##########.json` is appended).
    pub submissions_base_url: String,

    /// Base URL of the filing archives (`{cik}/{accession}/...` is appended).
    pub archives_base_url: String,

    /// Where downloaded filings are kept between runs.
    pub cache_dir: PathBuf,

    /// Filing form to track. Quarterly reports by default.
    pub filing_type: String,

    /// How many filings (quarters) to pull per issuer.
    pub quarter_count: usize,

    /// Per-request HTTP timeout.
    pub http_timeout: Duration,

    /// Pause between individual EDGAR requests.
    pub request_delay: Duration,

    /// Pause between issuers.
    pub issuer_delay: Duration,

    // =========================================================================
    // RETRY POLICY
    // =========================================================================

    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_multiplier: f64,

    // =========================================================================
    // STORAGE
    // =========================================================================

    /// Redis connection URL for the risk record store.
    pub redis_url: String,

    /// Hash holding one entry per (borrower, fund, date_added) triple.
    pub redis_hash: String,

    /// Pub/sub channel announcing newly inserted records.
    pub redis_channel: String,

    /// Sorted set of inserted records scored by date, for the dashboard.
    pub redis_sorted_set: String,

    /// Keep records in memory instead of touching Redis.
    pub dry_run: bool,

    // =========================================================================
    // UNIVERSE
    // =========================================================================

    /// The issuers to scan, in order.
    pub universe: Vec<Issuer>,
}

impl Config {
    /// Load configuration from the process environment. `main` loads `.env`
    /// into it first.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Missing keys and values
    /// that fail to parse fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let env_flag = |key: &str| lookup(key).as_deref().is_some_and(is_truthy);

        let universe = match lookup("BDC_RISK_UNIVERSE") {
            Some(raw) if !raw.trim().is_empty() => parse_universe(&raw),
            _ => default_universe(),
        };

        Config {
            user_agent: env_or_default(
                "BDC_RISK_USER_AGENT",
                "ShadowBank risk@shadowbank.local",
            ),
            submissions_base_url: env_or_default(
                "BDC_RISK_SUBMISSIONS_URL",
                "https://data.sec.gov/submissions",
            ),
            archives_base_url: env_or_default(
                "BDC_RISK_ARCHIVES_URL",
                "https://www.sec.gov/Archives/edgar/data",
            ),
            cache_dir: PathBuf::from(env_or_default("BDC_RISK_CACHE_DIR", "data/sec_filings")),
            filing_type: env_or_default("BDC_RISK_FILING_TYPE", "10-Q"),
            quarter_count: env_or_default("BDC_RISK_QUARTERS", "4").parse().unwrap_or(4),
            http_timeout: Duration::from_secs(
                env_or_default("BDC_RISK_HTTP_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            ),
            request_delay: Duration::from_millis(
                env_or_default("BDC_RISK_REQUEST_DELAY_MS", "150").parse().unwrap_or(150),
            ),
            issuer_delay: Duration::from_secs(
                env_or_default("BDC_RISK_ISSUER_DELAY_SECS", "3").parse().unwrap_or(3),
            ),

            retry_max_attempts: env_or_default("BDC_RISK_RETRY_ATTEMPTS", "3")
                .parse()
                .unwrap_or(3),
            retry_base_delay: Duration::from_secs(
                env_or_default("BDC_RISK_RETRY_MIN_SECS", "2").parse().unwrap_or(2),
            ),
            retry_max_delay: Duration::from_secs(
                env_or_default("BDC_RISK_RETRY_MAX_SECS", "10").parse().unwrap_or(10),
            ),
            retry_multiplier: env_or_default("BDC_RISK_RETRY_MULTIPLIER", "1")
                .parse()
                .unwrap_or(1.0),

            redis_url: env_or_default("BDC_RISK_REDIS_URL", "redis://127.0.0.1:6379"),
            redis_hash: env_or_default("BDC_RISK_REDIS_HASH", "bdc:risk_records"),
            redis_channel: env_or_default("BDC_RISK_REDIS_CHANNEL", "bdc:risk_records:new"),
            redis_sorted_set: env_or_default(
                "BDC_RISK_REDIS_SORTED_SET",
                "bdc:risk_records:history",
            ),
            dry_run: env_flag("BDC_RISK_DRY_RUN"),

            universe,
        }
    }
}

/// Whether the switch environment variable `key` is turned on. Logging is
/// configured through this before `Config` is built, so universe parsing
/// warnings reach the subscriber.
pub fn flag_from_env(key: &str) -> bool {
    env::var(key).ok().as_deref().is_some_and(is_truthy)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse `TICKER:CIK:Display Name` entries separated by commas.
///
/// The display name may itself contain colons; only the first two separate
/// fields. Entries missing a ticker or CIK are skipped with a warning rather
/// than failing the run.
pub fn parse_universe(raw: &str) -> Vec<Issuer> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let ticker = parts.next().map(str::trim).unwrap_or_default();
            let cik = parts.next().map(str::trim).unwrap_or_default();
            let name = parts.next().map(str::trim).unwrap_or_default();

            if ticker.is_empty() || cik.is_empty() || !cik.chars().all(|c| c.is_ascii_digit()) {
                warn!(entry = entry, "Skipping malformed universe entry");
                return None;
            }

            let name = if name.is_empty() { ticker } else { name };
            Some(Issuer::new(ticker, cik, name))
        })
        .collect()
}

/// The built-in universe: large, publicly traded BDCs with long 10-Q histories.
pub fn default_universe() -> Vec<Issuer> {
    vec![
        Issuer::new("ARCC", "0001287750", "Ares Capital Corp"),
        Issuer::new("FSK", "0001422183", "FS KKR Capital Corp"),
        Issuer::new("OBDC", "0001655888", "Blue Owl Capital Corp"),
        Issuer::new("PSEC", "0001287032", "Prospect Capital Corp"),
        Issuer::new("GBDC", "0001476765", "Golub Capital BDC"),
        Issuer::new("MAIN", "0001396440", "Main Street Capital Corp"),
        Issuer::new("HTGC", "0001280784", "Hercules Capital"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_universe_reads_all_fields() {
        let issuers = parse_universe("ARCC:0001287750:Ares Capital Corp, MAIN:0001396440:Main Street");
        assert_eq!(issuers.len(), 2);
        assert_eq!(issuers[0].ticker, "ARCC");
        assert_eq!(issuers[0].cik, "0001287750");
        assert_eq!(issuers[0].name, "Ares Capital Corp");
        assert_eq!(issuers[1].name, "Main Street");
    }

    #[test]
    fn test_parse_universe_skips_malformed_entries() {
        let issuers = parse_universe("ARCC,:123:Nameless,FSK:notacik:FS KKR,PSEC:0001287032");
        assert_eq!(issuers.len(), 1);
        assert_eq!(issuers[0].ticker, "PSEC");
        // Missing name falls back to the ticker
        assert_eq!(issuers[0].name, "PSEC");
    }

    #[test]
    fn test_lookup_overrides_and_defaults() {
        let config = Config::from_lookup(|key| match key {
            "BDC_RISK_QUARTERS" => Some("8".to_string()),
            "BDC_RISK_ISSUER_DELAY_SECS" => Some("not a number".to_string()),
            "BDC_RISK_DRY_RUN" => Some("TRUE".to_string()),
            _ => None,
        });
        assert_eq!(config.quarter_count, 8);
        assert_eq!(config.issuer_delay, Duration::from_secs(3));
        assert!(config.dry_run);
        assert_eq!(config.filing_type, "10-Q");
        assert_eq!(config.retry_max_attempts, 3);
    }

    #[test]
    fn test_default_universe_starts_with_ares() {
        let universe = default_universe();
        assert!(!universe.is_empty());
        assert_eq!(universe[0].cik, "0001287750");
    }
}
