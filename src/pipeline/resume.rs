//! Resume guidance after a failed or partially failed run.
//!
//! The resume point is the image after the last one that reached a result.
//! Images that failed individually are listed for a retry by name, so a rerun
//! never skips unfinished work and never repeats finished work.

use serde::Serialize;

use super::types::RunState;

/// Configuration field an operator edits to resume.
pub const START_FIELD: &str = "start_ordinal";
/// Configuration field listing images to retry by name.
pub const RETRY_FIELD: &str = "retry_images";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeGuidance {
    pub next_ordinal: u64,
    /// True when `next_ordinal` is a page number, false when it is a position.
    pub ordinal_based: bool,
    /// Images that failed individually and can be retried by name.
    pub retry_names: Vec<String>,
    pub message: String,
}

/// Compute where the next run should start.
///
/// - Ordinal mode: `last_successful_ordinal + 1`, or the start of the range
///   when nothing succeeded.
/// - Positional mode: `start_ordinal + attempted`.
/// - Runs selected by name resume with the failed and unattempted names;
///   `start_ordinal` does not apply to them.
pub fn compute_resume(state: &RunState) -> ResumeGuidance {
    let next_ordinal = if state.ordinals_available {
        state
            .last_successful_ordinal
            .map(|n| n + 1)
            .unwrap_or(state.start_ordinal)
    } else {
        state.start_ordinal + state.attempted() as u64
    };

    if let Some(selection) = &state.named_selection {
        let mut retry_names = state.failed_images.clone();
        retry_names.extend(selection.iter().skip(state.attempted() as usize).cloned());
        let message = format!(
            "To resume, set {RETRY_FIELD} = {retry_names:?} in the run configuration \
             ({START_FIELD} is ignored while {RETRY_FIELD} is set)"
        );
        return ResumeGuidance {
            next_ordinal,
            ordinal_based: state.ordinals_available,
            retry_names,
            message,
        };
    }

    let unit = if state.ordinals_available {
        "page number"
    } else {
        "position in name order"
    };

    let mut message = format!(
        "To resume, set {START_FIELD} = {next_ordinal} ({unit}) in the run configuration"
    );
    if !state.failed_images.is_empty() {
        message.push_str(&format!(
            "; to retry the {} failed image(s) only, set {RETRY_FIELD} = {:?}",
            state.failed_images.len(),
            state.failed_images
        ));
    }

    ResumeGuidance {
        next_ordinal,
        ordinal_based: state.ordinals_available,
        retry_names: state.failed_images.clone(),
        message,
    }
}

/// Guidance for a run that finished but left per-item failures behind.
pub fn retry_hint(state: &RunState) -> Option<ResumeGuidance> {
    if state.failed_images.is_empty() {
        return None;
    }
    let mut guidance = compute_resume(state);
    guidance.message = format!(
        "{} image(s) failed; to retry them only, set {RETRY_FIELD} = {:?}",
        state.failed_images.len(),
        state.failed_images
    );
    Some(guidance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ImageRecord, Mode};

    fn ordinal_state() -> RunState {
        let mut state = RunState::new(Mode::Cloud, 1);
        state.ordinals_available = true;
        state
    }

    #[test]
    fn resumes_after_last_successful_ordinal() {
        let mut state = ordinal_state();
        for n in 1..=5 {
            state.record_success(&ImageRecord::new(format!("id{n}"), format!("scan_{n}.png")));
        }
        let guidance = compute_resume(&state);
        assert_eq!(guidance.next_ordinal, 6);
        assert!(guidance.ordinal_based);
        assert!(guidance.message.contains("start_ordinal = 6"), "{}", guidance.message);
    }

    #[test]
    fn nothing_succeeded_restarts_at_range_start() {
        let mut state = RunState::new(Mode::Cloud, 40);
        state.ordinals_available = true;
        assert_eq!(compute_resume(&state).next_ordinal, 40);
    }

    #[test]
    fn positional_fallback_counts_processed_images() {
        let mut state = RunState::new(Mode::Local, 1);
        state.processed_count = 3;
        let guidance = compute_resume(&state);
        assert_eq!(guidance.next_ordinal, 4);
        assert!(!guidance.ordinal_based);
        assert!(guidance.message.contains("position"));
    }

    #[test]
    fn positional_resume_skips_images_that_failed_individually() {
        let mut state = RunState::new(Mode::Local, 1);
        state.record_success(&ImageRecord::new("a", "alpha.png"));
        state.record_failure(&ImageRecord::new("b", "bravo.png"));
        state.record_success(&ImageRecord::new("c", "charlie.png"));
        let guidance = compute_resume(&state);
        assert_eq!(guidance.next_ordinal, 4);
        assert_eq!(guidance.retry_names, vec!["bravo.png".to_string()]);
    }

    #[test]
    fn named_selection_resumes_by_name() {
        let mut state = ordinal_state();
        state.named_selection = Some(vec!["scan_3.png".into(), "scan_7.png".into(), "scan_8.png".into()]);
        state.record_failure(&ImageRecord::new("a", "scan_3.png"));
        let guidance = compute_resume(&state);
        assert_eq!(guidance.retry_names, vec!["scan_3.png", "scan_7.png", "scan_8.png"]);
        assert!(guidance.message.contains("retry_images = ["), "{}", guidance.message);
        assert!(guidance.message.contains("start_ordinal is ignored"), "{}", guidance.message);
    }

    #[test]
    fn positional_fallback_respects_range_start() {
        let mut state = RunState::new(Mode::Local, 10);
        state.processed_count = 3;
        assert_eq!(compute_resume(&state).next_ordinal, 13);
    }

    #[test]
    fn failed_images_are_listed_for_retry() {
        let mut state = ordinal_state();
        state.record_success(&ImageRecord::new("a", "scan_1.png"));
        state.record_failure(&ImageRecord::new("b", "scan_2.png"));
        let guidance = compute_resume(&state);
        assert_eq!(guidance.retry_names, vec!["scan_2.png".to_string()]);
        assert!(guidance.message.contains("retry_images"));
    }

    #[test]
    fn retry_hint_only_when_something_failed() {
        let mut state = ordinal_state();
        assert!(retry_hint(&state).is_none());
        state.record_failure(&ImageRecord::new("b", "scan_2.png"));
        let hint = retry_hint(&state).unwrap();
        assert!(hint.message.contains("scan_2.png"));
    }
}
