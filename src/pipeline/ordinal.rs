//! Ordinal extraction: derive a page number from a scanned image filename.
//!
//! Archives name their scans in a handful of incompatible conventions. The
//! cascade below is evaluated in order and the first match wins:
//!
//! 1. `image - 2024-03-15 10.22.33.png` timestamped export → no ordinal
//! 2. `image (12).png` → 12
//! 3. `image00042.png` → 42
//! 4. `00042.png` → 42
//! 5. `IMG_20240315_0042.jpg` → 42
//! 6. `007821451_00155.jpeg`, `a-b_c-00155.jpg` → digits after the LAST `_`, `-` or `.`
//!
//! Pure functions, no I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static TIMESTAMP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^image\s*-\s*\d{4}-\d{2}-\d{2}").unwrap());

static PARENTHESIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^image\s*\((\d+)\)\s*$").unwrap());

static IMAGE_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^image(\d+)$").unwrap());

static CAMERA_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^img_\d{8}_(\d+)$").unwrap());

const SEPARATORS: [char; 3] = ['_', '-', '.'];

/// Which rule of the cascade produced (or refused) an ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamePattern {
    Timestamp,
    Parenthesized,
    ImagePrefix,
    PureNumeric,
    CameraDate,
    Separator(char),
    Unmatched,
}

impl NamePattern {
    /// Operator-facing description used in error messages.
    pub fn hint(&self) -> String {
        match self {
            Self::Timestamp => {
                "image - <timestamp>: timestamped names carry no page number, use retry_images or rename the files".into()
            }
            Self::Parenthesized => "image (N): use the number in parentheses".into(),
            Self::ImagePrefix => "imageXXXXX: use the digits after 'image'".into(),
            Self::PureNumeric => "XXXXX: the whole filename is the number".into(),
            Self::CameraDate => "IMG_YYYYMMDD_XXXX: use the digits after the date".into(),
            Self::Separator(sep) => {
                let word = match sep {
                    '_' => "underscore",
                    '-' => "hyphen",
                    _ => "dot",
                };
                format!("PREFIX{sep}XXXXX: use number after {word}")
            }
            Self::Unmatched => GENERIC_HINT.into(),
        }
    }
}

const GENERIC_HINT: &str = "no numbered filenames found, images are processed in name order";

/// Extract the ordinal from a filename, or `None` when no rule yields one.
pub fn extract_ordinal(filename: &str) -> Option<u64> {
    classify_name(filename).0
}

/// Run the cascade and report which rule decided.
pub fn classify_name(filename: &str) -> (Option<u64>, NamePattern) {
    let name = filename.trim();
    if name.is_empty() {
        return (None, NamePattern::Unmatched);
    }

    if TIMESTAMP_NAME.is_match(name) {
        return (None, NamePattern::Timestamp);
    }

    let stem = file_stem(name);

    if let Some(n) = capture_number(&PARENTHESIZED, stem) {
        return (Some(n), NamePattern::Parenthesized);
    }
    if let Some(n) = capture_number(&IMAGE_PREFIX, stem) {
        return (Some(n), NamePattern::ImagePrefix);
    }
    if is_all_digits(stem) {
        if let Ok(n) = stem.parse::<u64>() {
            return (Some(n), NamePattern::PureNumeric);
        }
    }
    if let Some(n) = capture_number(&CAMERA_DATE, stem) {
        return (Some(n), NamePattern::CameraDate);
    }

    if let Some(idx) = stem.rfind(SEPARATORS) {
        let sep = stem[idx..].chars().next().unwrap_or('_');
        let suffix = &stem[idx + sep.len_utf8()..];
        if is_all_digits(suffix) {
            if let Ok(n) = suffix.parse::<u64>() {
                return (Some(n), NamePattern::Separator(sep));
            }
        }
    }

    (None, NamePattern::Unmatched)
}

/// Strip a trailing extension. A purely numeric "extension" is part of the
/// name (`page.00155`), not an extension.
fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx + 1..];
            if ext.is_empty() || is_all_digits(ext) {
                name
            } else {
                &name[..idx]
            }
        }
        _ => name,
    }
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn capture_number(re: &Regex, stem: &str) -> Option<u64> {
    re.captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

// ──────────────────────────────────────────────
// Population scan
// ──────────────────────────────────────────────

/// Ordinals found across a set of names, with the dominant naming pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulationScan {
    pub numbers: BTreeSet<u64>,
    pub pattern_hint: String,
}

impl PopulationScan {
    pub fn range(&self) -> Option<(u64, u64)> {
        Some((*self.numbers.first()?, *self.numbers.last()?))
    }

    /// "1..155" style description, or "none".
    pub fn range_label(&self) -> String {
        match self.range() {
            Some((lo, hi)) if lo == hi => lo.to_string(),
            Some((lo, hi)) => format!("{lo}..{hi}"),
            None => "none".into(),
        }
    }
}

/// Apply `extract_ordinal` to every name and describe the dominant pattern.
pub fn scan_population<S: AsRef<str>>(names: &[S]) -> PopulationScan {
    let mut numbers = BTreeSet::new();
    let mut pattern_counts: BTreeMap<NamePattern, usize> = BTreeMap::new();

    for name in names {
        let (ordinal, pattern) = classify_name(name.as_ref());
        if let Some(n) = ordinal {
            numbers.insert(n);
        }
        if pattern != NamePattern::Unmatched {
            *pattern_counts.entry(pattern).or_default() += 1;
        }
    }

    // Highest count wins; ties go to the earlier rule in the cascade.
    let dominant = pattern_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(pattern, _)| *pattern);

    PopulationScan {
        numbers,
        pattern_hint: dominant.map(|p| p.hint()).unwrap_or_else(|| GENERIC_HINT.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_names_have_no_ordinal() {
        assert_eq!(extract_ordinal("image - 2024-03-15 10.22.33.png"), None);
        assert_eq!(extract_ordinal("Image - 2023-11-02T08_15_00.JPG"), None);
        assert_eq!(classify_name("image - 2024-03-15.png").1, NamePattern::Timestamp);
    }

    #[test]
    fn parenthesized_form() {
        assert_eq!(extract_ordinal("image (12).png"), Some(12));
        assert_eq!(extract_ordinal("IMAGE(3).JPEG"), Some(3));
    }

    #[test]
    fn image_prefix_strips_leading_zeros() {
        assert_eq!(extract_ordinal("image00042.png"), Some(42));
        assert_eq!(classify_name("image00042.png").1, NamePattern::ImagePrefix);
    }

    #[test]
    fn pure_numeric_stem() {
        assert_eq!(extract_ordinal("00042.jpg"), Some(42));
        assert_eq!(extract_ordinal("7.TIFF"), Some(7));
    }

    #[test]
    fn camera_date_form_uses_trailing_digits() {
        assert_eq!(extract_ordinal("IMG_20240315_0042.jpg"), Some(42));
        assert_eq!(classify_name("img_20240315_0042.jpg").1, NamePattern::CameraDate);
    }

    #[test]
    fn collection_prefix_does_not_leak_into_ordinal() {
        assert_eq!(extract_ordinal("007821451_00155.jpeg"), Some(155));
    }

    #[test]
    fn last_separator_wins() {
        assert_eq!(extract_ordinal("a-b_c-00155.jpg"), Some(155));
        assert_eq!(classify_name("a-b_c-00155.jpg").1, NamePattern::Separator('-'));
        assert_eq!(extract_ordinal("prefix-part1_part2-00155.png"), Some(155));
    }

    #[test]
    fn numeric_suffix_after_dot_is_not_an_extension() {
        assert_eq!(extract_ordinal("page.00155"), Some(155));
    }

    #[test]
    fn no_match_is_absent() {
        assert_eq!(extract_ordinal("no-number.jpg"), None);
        assert_eq!(extract_ordinal("cover.png"), None);
        assert_eq!(extract_ordinal("scan_12a.png"), None);
    }

    #[test]
    fn empty_input_is_absent() {
        assert_eq!(extract_ordinal(""), None);
        assert_eq!(extract_ordinal("   "), None);
    }

    #[test]
    fn extension_case_does_not_matter() {
        assert_eq!(extract_ordinal("scan_0007.JPG"), extract_ordinal("scan_0007.jpg"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let names = ["image (4).png", "007821451_00155.jpeg", "IMG_20240101_9.jpg", "x.png"];
        for name in names {
            assert_eq!(extract_ordinal(name), extract_ordinal(name));
        }
    }

    #[test]
    fn overflowing_digits_are_absent() {
        assert_eq!(extract_ordinal("scan_99999999999999999999999.png"), None);
    }

    #[test]
    fn scan_reports_numbers_and_dominant_pattern() {
        let names = [
            "007821451_00001.jpeg",
            "007821451_00002.jpeg",
            "007821451_00003.jpeg",
            "cover.jpeg",
        ];
        let scan = scan_population(&names);
        assert_eq!(scan.numbers, BTreeSet::from([1, 2, 3]));
        assert_eq!(scan.pattern_hint, "PREFIX_XXXXX: use number after underscore");
        assert_eq!(scan.range_label(), "1..3");
    }

    #[test]
    fn scan_of_unnumbered_names_gives_generic_hint() {
        let scan = scan_population(&["cover.png", "back.png"]);
        assert!(scan.numbers.is_empty());
        assert_eq!(scan.pattern_hint, GENERIC_HINT);
        assert_eq!(scan.range_label(), "none");
    }

    #[test]
    fn scan_of_empty_population() {
        let names: [&str; 0] = [];
        let scan = scan_population(&names);
        assert!(scan.numbers.is_empty());
        assert_eq!(scan.range(), None);
    }

    #[test]
    fn scan_of_timestamped_exports_explains_missing_numbers() {
        let scan = scan_population(&["image - 2024-03-15 10.22.33.png", "image - 2024-03-15 10.22.40.png"]);
        assert!(scan.numbers.is_empty());
        assert!(scan.pattern_hint.contains("timestamp"));
    }
}
