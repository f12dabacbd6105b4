// =============================================================================
// date_resolver.rs - WHEN WAS THIS THING ACTUALLY FILED?
// =============================================================================
//
// A surprisingly hard question. EDGAR's full-submission text usually opens
// with an SEC header that says exactly when the filing landed:
//
//   CONFORMED PERIOD OF REPORT:   20240331
//   FILED AS OF DATE:             20240430
//   DATE AS OF CHANGE:            20240430
//
// Usually. Plain-text-only filings sometimes lose the header, sometimes
// mangle it, and sometimes carry a date that isn't a date. When the header
// lets us down we fall back to the accession identifier, which embeds the
// filing year and a per-filer sequence number that grows through the year:
//
//   0001287750-24-000032
//   ^^^^^^^^^^ ^^ ^^^^^^
//   filer      yr sequence
//
// The sequence number is mapped onto a quarter with fixed breakpoints and
// the date is pinned to the 15th of the quarter's last month. It is not a
// calendar-accurate date. It is monotonic, which is all the series builder
// needs to put quarters in order.
// =============================================================================

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use chrono::NaiveDate;

use crate::models::{DateSource, FilingHandle};

/// Header labels and the field each one means, in priority order.
/// Evaluated once into a single automaton; the table order decides which
/// field wins when several are present.
const HEADER_FIELDS: &[(&str, DateSource)] = &[
    ("filed as of date", DateSource::FiledAsOf),
    ("conformed period of report", DateSource::ConformedPeriod),
    ("date as of change", DateSource::DateAsOfChange),
];

static HEADER_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(HEADER_FIELDS.iter().map(|(label, _)| *label))
        .expect("header field labels are valid literals")
});

/// Sequence-number breakpoints: (exclusive upper bound, month).
const SEQUENCE_QUARTERS: &[(u32, u32)] = &[(20, 3), (35, 6), (50, 9)];
const LATE_SEQUENCE_MONTH: u32 = 12;
const ESTIMATED_DAY: u32 = 15;

/// Document extensions that can hold a filing body.
const DOCUMENT_EXTENSIONS: &[&str] = &["htm", "html", "txt"];

/// A filing date plus where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: Option<NaiveDate>,
    pub source: DateSource,
}

impl ResolvedDate {
    pub fn unknown() -> Self {
        Self {
            date: None,
            source: DateSource::Unknown,
        }
    }

    /// `YYYY-MM-DD`, or `unknown`.
    pub fn as_string(&self) -> String {
        self.date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Resolve the date for `handle` from text the caller already loaded. An
/// empty accession falls back to the filing directory's name.
pub fn resolve_for_handle(handle: &FilingHandle, text: Option<&str>) -> ResolvedDate {
    resolve_from_text(text, &handle_accession(handle))
}

/// Resolve a filing date from already-loaded text (if any) and the
/// accession identifier. Header metadata first, accession estimate second.
pub fn resolve_from_text(text: Option<&str>, accession: &str) -> ResolvedDate {
    if let Some((date, source)) = text.and_then(find_header_date) {
        return ResolvedDate {
            date: Some(date),
            source,
        };
    }

    match estimate_from_accession(accession) {
        Some(date) => ResolvedDate {
            date: Some(date),
            source: DateSource::AccessionEstimate,
        },
        None => ResolvedDate::unknown(),
    }
}

/// Look for the SEC header date fields. Each label must be followed by an
/// 8-digit `YYYYMMDD` token (an optional colon and whitespace in between).
/// A token that isn't a real calendar date counts as no match for that
/// occurrence.
pub fn find_header_date(text: &str) -> Option<(NaiveDate, DateSource)> {
    let mut found: Vec<Option<NaiveDate>> = vec![None; HEADER_FIELDS.len()];

    for m in HEADER_AUTOMATON.find_iter(text) {
        let idx = m.pattern().as_usize();
        if found[idx].is_some() {
            continue;
        }
        found[idx] = date_token_after(&text[m.end()..]);

        // The highest-priority field settles it; no need to keep scanning.
        if found[0].is_some() {
            break;
        }
    }

    HEADER_FIELDS
        .iter()
        .zip(found)
        .find_map(|((_, source), date)| date.map(|d| (d, *source)))
}

fn date_token_after(rest: &str) -> Option<NaiveDate> {
    let rest = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let token = rest.get(..8)?;
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if rest.as_bytes().get(8).is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(token, "%Y%m%d").ok()
}

/// Estimate a filing date from an accession identifier.
///
/// Accepts the dashed form (`0001287750-24-000032`, year as 2 or 4 digits)
/// and the compact 18-digit form (`000128775024000032`). Two-digit years
/// from 90 up are 1990s filings; the rest are 2000s.
pub fn estimate_from_accession(accession: &str) -> Option<NaiveDate> {
    let accession = accession.trim();
    let parts: Vec<&str> = accession.split('-').collect();

    let (year_part, sequence_part) = match parts.as_slice() {
        [_, year, sequence] => (*year, *sequence),
        [compact] if compact.len() == 18 && compact.bytes().all(|b| b.is_ascii_digit()) => {
            (&compact[10..12], &compact[12..])
        }
        _ => return None,
    };

    if year_part.is_empty()
        || sequence_part.is_empty()
        || !year_part.bytes().all(|b| b.is_ascii_digit())
        || !sequence_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let year: i32 = match year_part.len() {
        2 => match year_part.parse::<i32>().ok()? {
            yy if yy >= 90 => 1900 + yy,
            yy => 2000 + yy,
        },
        4 => year_part.parse().ok()?,
        _ => return None,
    };
    let sequence: u32 = sequence_part.parse().ok()?;

    let month = SEQUENCE_QUARTERS
        .iter()
        .find(|(upper, _)| sequence < *upper)
        .map(|(_, month)| *month)
        .unwrap_or(LATE_SEQUENCE_MONTH);

    NaiveDate::from_ymd_opt(year, month, ESTIMATED_DAY)
}

fn handle_accession(handle: &FilingHandle) -> String {
    if !handle.accession.trim().is_empty() {
        return handle.accession.clone();
    }
    handle
        .location
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// =============================================================================
// Document selection
// =============================================================================
// A filing directory can hold the full submission text, the primary HTML
// document, and whatever else came along. The filing body is reliably the
// biggest file, so that's the one both the resolver and the extractor read.
// =============================================================================

/// The largest `.htm`/`.html`/`.txt` file in `dir`, if any.
pub fn select_primary_document(dir: &Path) -> io::Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !is_document(&path) {
            continue;
        }
        let size = entry.metadata()?.len();
        let better = match &best {
            None => true,
            // Ties go to the lexically greater name so the choice is stable.
            Some((best_size, best_path)) => (size, &path) > (*best_size, best_path),
        };
        if better {
            best = Some((size, path));
        }
    }

    Ok(best.map(|(_, path)| path))
}

/// Read the primary document as text. Bytes that aren't valid UTF-8 are
/// replaced rather than rejected; filings are not always honest about
/// their encoding.
pub fn load_primary_document(dir: &Path) -> io::Result<Option<(PathBuf, String)>> {
    let Some(path) = select_primary_document(dir)? else {
        return Ok(None);
    };
    let bytes = fs::read(&path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    Ok(Some((path, text)))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            DOCUMENT_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::Issuer;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_filed_as_of_date_from_header() {
        let text = "<SEC-HEADER>\nACCESSION NUMBER:\t\t0001287750-24-000032\n\
                    CONFORMED PERIOD OF REPORT:\t20240331\n\
                    FILED AS OF DATE:\t\t20240430\n\
                    DATE AS OF CHANGE:\t\t20240501\n";
        let resolved = resolve_from_text(Some(text), "0001287750-24-000032");
        assert_eq!(resolved.date, Some(date(2024, 4, 30)));
        assert_eq!(resolved.source, DateSource::FiledAsOf);
        assert_eq!(resolved.as_string(), "2024-04-30");
    }

    #[test]
    fn test_falls_through_to_lower_priority_field() {
        let text = "filed as of date: 20241399\nconformed period of report: 20240930\n";
        let (d, source) = find_header_date(text).unwrap();
        assert_eq!(d, date(2024, 9, 30));
        assert_eq!(source, DateSource::ConformedPeriod);
    }

    #[test]
    fn test_rejects_tokens_that_are_not_eight_digits() {
        assert_eq!(find_header_date("FILED AS OF DATE: 2024043"), None);
        assert_eq!(find_header_date("FILED AS OF DATE: 202404301"), None);
        assert_eq!(find_header_date("FILED AS OF DATE: April 30"), None);
    }

    #[test]
    fn test_accession_estimate() {
        let resolved = resolve_from_text(None, "0001287750-24-000032");
        assert_eq!(resolved.date, Some(date(2024, 6, 15)));
        assert_eq!(resolved.source, DateSource::AccessionEstimate);
    }

    #[test]
    fn test_accession_breakpoints() {
        assert_eq!(estimate_from_accession("0001287750-23-000019"), Some(date(2023, 3, 15)));
        assert_eq!(estimate_from_accession("0001287750-23-000020"), Some(date(2023, 6, 15)));
        assert_eq!(estimate_from_accession("0001287750-23-000049"), Some(date(2023, 9, 15)));
        assert_eq!(estimate_from_accession("0001287750-23-000050"), Some(date(2023, 12, 15)));
        assert_eq!(estimate_from_accession("0001287750-2022-000001"), Some(date(2022, 3, 15)));
        assert_eq!(estimate_from_accession("000128775024000032"), Some(date(2024, 6, 15)));
    }

    #[test]
    fn test_two_digit_years_pivot_at_ninety() {
        assert_eq!(estimate_from_accession("0001287750-99-000010"), Some(date(1999, 3, 15)));
        assert_eq!(estimate_from_accession("0000950123-90-000060"), Some(date(1990, 12, 15)));
        assert_eq!(estimate_from_accession("0001287750-89-000010"), Some(date(2089, 3, 15)));
        assert_eq!(estimate_from_accession("000095012399000010"), Some(date(1999, 3, 15)));
    }

    #[test]
    fn test_unparseable_accession_is_unknown() {
        assert_eq!(estimate_from_accession("not-an-accession"), None);
        assert_eq!(estimate_from_accession("0001287750-240-000032"), None);
        assert_eq!(estimate_from_accession(""), None);
        assert_eq!(resolve_from_text(Some("no header here"), "garbage"), ResolvedDate::unknown());
        assert_eq!(ResolvedDate::unknown().as_string(), "unknown");
    }

    #[test]
    fn test_largest_document_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("primary.htm"), "small").unwrap();
        fs::write(dir.path().join("full-submission.txt"), "a much larger document body").unwrap();
        fs::write(dir.path().join("huge.jpg"), vec![0u8; 4096]).unwrap();

        let chosen = select_primary_document(dir.path()).unwrap().unwrap();
        assert_eq!(chosen.file_name().unwrap(), "full-submission.txt");
    }

    #[test]
    fn test_missing_directory_has_no_document() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(select_primary_document(&missing).unwrap(), None);
    }

    #[test]
    fn test_resolve_handle_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("full-submission.txt"),
            "FILED AS OF DATE:\t\t20231101\n<DOCUMENT>...",
        )
        .unwrap();
        let handle = FilingHandle {
            issuer: Issuer::new("ARCC", "0001287750", "Ares Capital Corp"),
            filing_type: "10-Q".to_string(),
            accession: "0001287750-23-000040".to_string(),
            location: dir.path().to_path_buf(),
            retrieved_at: Utc::now(),
        };
        let (_, text) = load_primary_document(&handle.location).unwrap().unwrap();
        let resolved = resolve_for_handle(&handle, Some(&text));
        assert_eq!(resolved.date, Some(date(2023, 11, 1)));
        assert_eq!(resolved.source, DateSource::FiledAsOf);
    }
}
