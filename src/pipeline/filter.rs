//! Selection of images from an enumerated listing.
//!
//! Both sources hand their raw listing to `select_images`, so ordering and
//! range semantics are identical in every mode.

use std::collections::BTreeSet;

use super::error::PipelineError;
use super::ordinal::scan_population;
use super::types::{FilterSpec, ImageRecord};

/// Image extensions accepted by every source (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff", "heic",
];

/// True if the filename carries a supported image extension.
pub fn is_supported_image(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Order and filter a raw listing according to `filter`.
///
/// - Enumeration order is lexicographic by display name.
/// - When any image carries an ordinal, images are ordered by ordinal and the
///   range applies to ordinals; unnumbered images are left out of range runs.
/// - Otherwise the range applies to 1-based positions in name order.
/// - An explicit name list bypasses the range entirely but keeps the same
///   ordering, so page order always matches processing order.
pub fn select_images(
    mut records: Vec<ImageRecord>,
    filter: &FilterSpec,
) -> Result<Vec<ImageRecord>, PipelineError> {
    records.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    if records.is_empty() {
        return Err(PipelineError::NoImages(
            "the source contains no supported image files".into(),
        ));
    }

    let total = records.len();
    let scan = {
        let names: Vec<&str> = records.iter().map(|r| r.display_name.as_str()).collect();
        scan_population(&names)
    };

    if let Some(wanted) = &filter.explicit_name_list {
        return select_named(records, wanted, &scan.pattern_hint);
    }

    let ordinals_available = records.iter().any(|r| r.ordinal.is_some());
    let start = filter.start_ordinal.max(1);

    let selected: Vec<ImageRecord> = if ordinals_available {
        let (mut numbered, unnumbered): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.ordinal.is_some());

        if !unnumbered.is_empty() {
            let sample: Vec<&str> = unnumbered
                .iter()
                .take(5)
                .map(|r| r.display_name.as_str())
                .collect();
            tracing::warn!(
                count = unnumbered.len(),
                sample = ?sample,
                "Images without a page number are skipped in range runs, list them in retry_images to process them"
            );
        }

        numbered.sort_by(by_ordinal);
        let in_range = numbered
            .into_iter()
            .filter(|r| r.ordinal.is_some_and(|n| n >= start));
        take_count(in_range, filter.count)
    } else {
        let positional = records.into_iter().skip((start - 1) as usize);
        take_count(positional, filter.count)
    };

    if selected.is_empty() {
        return Err(PipelineError::NoImages(format!(
            "no images at or after {start} (available: {}). Naming pattern: {}",
            if ordinals_available {
                scan.range_label()
            } else {
                format!("positions 1..{total}")
            },
            scan.pattern_hint
        )));
    }

    tracing::debug!(
        selected = selected.len(),
        start,
        count = filter.count,
        ordinals_available,
        "Images selected"
    );

    Ok(selected)
}

fn by_ordinal(a: &ImageRecord, b: &ImageRecord) -> std::cmp::Ordering {
    a.ordinal
        .cmp(&b.ordinal)
        .then_with(|| a.display_name.cmp(&b.display_name))
}

fn take_count(iter: impl Iterator<Item = ImageRecord>, count: usize) -> Vec<ImageRecord> {
    if count == 0 {
        iter.collect()
    } else {
        iter.take(count).collect()
    }
}

fn select_named(
    records: Vec<ImageRecord>,
    wanted: &[String],
    pattern_hint: &str,
) -> Result<Vec<ImageRecord>, PipelineError> {
    let wanted: BTreeSet<&str> = wanted.iter().map(|n| n.trim()).filter(|n| !n.is_empty()).collect();

    let mut selected: Vec<ImageRecord> = records
        .into_iter()
        .filter(|r| wanted.contains(r.display_name.as_str()))
        .collect();
    // Unnumbered names sort ahead of numbered ones (None < Some).
    if selected.iter().any(|r| r.ordinal.is_some()) {
        selected.sort_by(by_ordinal);
    }

    let found: BTreeSet<&str> = selected.iter().map(|r| r.display_name.as_str()).collect();
    let missing: Vec<&&str> = wanted.iter().filter(|n| !found.contains(**n)).collect();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "Requested images not found in source");
    }

    if selected.is_empty() {
        return Err(PipelineError::NoImages(format!(
            "none of the {} requested images exist in the source. Naming pattern: {pattern_hint}",
            wanted.len()
        )));
    }

    Ok(selected)
}
