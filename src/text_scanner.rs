// =============================================================================
// text_scanner.rs - THE DISTRESS SIGNAL COUNTER
// =============================================================================
//
// BDC 10-Qs are long. Very long. Somewhere in those hundreds of pages of
// schedule-of-investments tables and risk-factor boilerplate are the two
// phrases that matter when a lender's book starts to rot:
//
//   "non-accrual"       (the borrower stopped paying interest and the BDC
//                        stopped pretending it would)
//   "payment default"   (exactly what it sounds like)
//
// We lower-case the whole filing and count every pattern in each family
// independently, then add them up. A single phrase that happens to satisfy
// two patterns in the same family is counted twice. The tallies have always
// been computed that way, and a quarter-over-quarter trend only needs the
// method to be consistent, not pristine.
//
// Literal patterns are counted with memchr's SIMD substring finder. The
// whitespace-tolerant ones ("non   accrual", "payment\ndefault") need a regex.
// =============================================================================

use std::sync::LazyLock;

use memchr::memmem::Finder;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::date_resolver;
use crate::models::{ExtractionResult, FilingHandle};

static NON_ACCRUAL_LITERALS: LazyLock<Vec<Finder<'static>>> =
    LazyLock::new(|| vec![Finder::new("non-accrual"), Finder::new("nonaccrual")]);

static NON_ACCRUAL_SPACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"non\s+accrual").expect("non-accrual pattern compiles"));

static PAYMENT_DEFAULT_LITERALS: LazyLock<Vec<Finder<'static>>> =
    LazyLock::new(|| vec![Finder::new("payment-default")]);

static PAYMENT_DEFAULT_SPACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"payment\s+default").expect("payment-default pattern compiles"));

/// Raw tallies for one piece of text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistressCounts {
    pub non_accrual: u64,
    pub payment_default: u64,
}

impl DistressCounts {
    pub fn total(&self) -> u64 {
        self.non_accrual + self.payment_default
    }
}

/// Count distress phrases in `text`. Case-insensitive; every pattern in a
/// family is applied on its own and the counts are summed.
pub fn count_distress_signals(text: &str) -> DistressCounts {
    if text.is_empty() {
        return DistressCounts::default();
    }

    let lowered = text.to_lowercase();
    let bytes = lowered.as_bytes();

    // Every pattern ends in one of these two words. No word, no work.
    let has_accrual = memchr::memmem::find(bytes, b"accrual").is_some();
    let has_default = memchr::memmem::find(bytes, b"default").is_some();

    let non_accrual = if has_accrual {
        count_family(&lowered, &NON_ACCRUAL_LITERALS, &NON_ACCRUAL_SPACED)
    } else {
        0
    };
    let payment_default = if has_default {
        count_family(&lowered, &PAYMENT_DEFAULT_LITERALS, &PAYMENT_DEFAULT_SPACED)
    } else {
        0
    };

    DistressCounts {
        non_accrual,
        payment_default,
    }
}

fn count_family(lowered: &str, literals: &[Finder<'static>], spaced: &Regex) -> u64 {
    let literal_hits: usize = literals
        .iter()
        .map(|finder| finder.find_iter(lowered.as_bytes()).count())
        .sum();
    let spaced_hits = spaced.find_iter(lowered).count();
    (literal_hits + spaced_hits) as u64
}

/// Read a cached filing, count its distress phrases and resolve its date.
///
/// Never fails: an unreadable or missing document yields zero counts, and
/// the date falls back to whatever the accession identifier can tell us.
pub fn extract(handle: &FilingHandle) -> ExtractionResult {
    let text = match date_resolver::load_primary_document(&handle.location) {
        Ok(Some((path, text))) => {
            debug!(
                accession = handle.accession.as_str(),
                filing_type = handle.filing_type.as_str(),
                retrieved_at = %handle.retrieved_at,
                document = %path.display(),
                bytes = text.len(),
                "Selected primary document"
            );
            Some(text)
        }
        Ok(None) => {
            warn!(
                ticker = handle.issuer.ticker.as_str(),
                accession = handle.accession.as_str(),
                location = %handle.location.display(),
                "No readable document in filing directory, counting zero"
            );
            None
        }
        Err(e) => {
            warn!(
                ticker = handle.issuer.ticker.as_str(),
                accession = handle.accession.as_str(),
                error = %e,
                "Failed to read filing, counting zero"
            );
            None
        }
    };

    let counts = text
        .as_deref()
        .map(count_distress_signals)
        .unwrap_or_default();
    let resolved = date_resolver::resolve_for_handle(handle, text.as_deref());

    info!(
        ticker = handle.issuer.ticker.as_str(),
        accession = handle.accession.as_str(),
        non_accrual = counts.non_accrual,
        payment_default = counts.payment_default,
        total = counts.total(),
        filing_date = resolved.as_string().as_str(),
        date_source = %resolved.source,
        "Extraction complete"
    );

    ExtractionResult::new(
        handle.issuer.clone(),
        handle.accession.clone(),
        counts.non_accrual,
        counts.payment_default,
        resolved.date,
        resolved.source,
    )
}
