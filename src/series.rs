// =============================================================================
// series.rs - FOUR QUARTERS IN A ROW, AND WHAT THEY MEAN
// =============================================================================
//
// Turns a pile of per-filing extraction results into an ordered, labelled
// quarterly series, then asks the only question anyone cares about: is this
// lender's book getting worse?
//
// Ordering: ascending by filing date, and filings with no resolvable date go
// FIRST. That is the historical ordering (an unknown date used to be an empty
// string, which sorts before every real date). It is probably not what anyone
// would choose on purpose, but changing it would silently reshuffle every
// existing trend line.
//
// Classification uses two tests at once:
//
//   ratio:    mean(second half) vs mean(first half), with a 10% band
//   endpoint: last - first, with a +/-10 band
//
// Short series are basically decided by the endpoint test, long ones by the
// ratio. Either one firing is enough.
// =============================================================================

use std::collections::HashSet;

use chrono::Datelike;
use tracing::{debug, info};

use crate::models::{ExtractionResult, TrendSignal};

/// Ratio above which the second half counts as a deterioration.
const DETERIORATION_RATIO: f64 = 1.1;
/// Ratio below which the second half counts as an improvement.
const IMPROVEMENT_RATIO: f64 = 0.9;
/// Absolute endpoint change that fires on its own.
const ENDPOINT_THRESHOLD: i64 = 10;

/// One point in the series: a filing and the label it is reported under.
#[derive(Debug, Clone)]
pub struct QuarterPoint {
    pub label: String,
    pub result: ExtractionResult,
}

/// Chronologically ordered extraction results for one issuer.
#[derive(Debug, Clone, Default)]
pub struct QuarterlySeries {
    points: Vec<QuarterPoint>,
}

impl QuarterlySeries {
    /// Order `results` by filing date, drop repeats of the same accession,
    /// keep the most recent `max_len`, and label each point.
    pub fn build(results: Vec<ExtractionResult>, max_len: usize) -> Self {
        let mut seen = HashSet::new();
        let mut ordered: Vec<ExtractionResult> = results
            .into_iter()
            .filter(|r| seen.insert(r.accession.clone()))
            .collect();
        sort_chronologically(&mut ordered);

        if ordered.len() > max_len {
            ordered.drain(..ordered.len() - max_len);
        }

        let points = ordered
            .into_iter()
            .enumerate()
            .map(|(i, result)| QuarterPoint {
                label: quarter_label(&result, i),
                result,
            })
            .collect();

        Self { points }
    }

    pub fn points(&self) -> &[QuarterPoint] {
        &self.points
    }

    pub fn non_accrual_counts(&self) -> Vec<u64> {
        self.points.iter().map(|p| p.result.non_accrual_count).collect()
    }

    /// "Q1 2024(12) -> Q2 2024(15) -> ..."
    pub fn trend_string(&self) -> String {
        self.points
            .iter()
            .map(|p| format!("{}({})", p.label, p.result.non_accrual_count))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Stable sort by filing date, unknown dates first.
pub fn sort_chronologically(results: &mut [ExtractionResult]) {
    // `None < Some(_)` for Option, which is exactly the unknown-first rule.
    results.sort_by_key(|r| r.filing_date);
}

/// Calendar quarter label when the date is known, positional otherwise.
fn quarter_label(result: &ExtractionResult, position: usize) -> String {
    match result.filing_date {
        Some(date) => format!("Q{} {}", (date.month() - 1) / 3 + 1, date.year()),
        None => format!("Q{}", position + 1),
    }
}

fn mean(values: &[u64]) -> f64 {
    let sum: u64 = values.iter().sum();
    sum as f64 / values.len().max(1) as f64
}

/// Classify a chronologically sorted sequence of non-accrual counts.
pub fn classify(counts: &[u64]) -> TrendSignal {
    if counts.len() < 2 {
        debug!(points = counts.len(), "Not enough quarters to classify");
        return TrendSignal::InsufficientData;
    }

    let mid = counts.len() / 2;
    let (first_half, second_half) = counts.split_at(mid);
    let first_mean = mean(first_half);
    let second_mean = mean(second_half);
    let change = counts[counts.len() - 1] as i64 - counts[0] as i64;

    let signal = if second_mean > first_mean * DETERIORATION_RATIO || change > ENDPOINT_THRESHOLD {
        TrendSignal::Deteriorating
    } else if second_mean < first_mean * IMPROVEMENT_RATIO || change < -ENDPOINT_THRESHOLD {
        TrendSignal::Improving
    } else {
        TrendSignal::Stable
    };

    info!(
        points = counts.len(),
        first_half_mean = first_mean,
        second_half_mean = second_mean,
        change = change,
        signal = %signal,
        "Trend classified"
    );
    signal
}
