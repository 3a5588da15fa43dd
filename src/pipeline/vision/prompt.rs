use std::path::Path;

use crate::pipeline::PipelineError;

/// Instructions sent with every image unless the run configuration overrides them.
pub const DEFAULT_INSTRUCTIONS: &str = "\
Transcribe all visible text from this scanned page exactly as written. \
Preserve paragraph breaks, headings and list structure. \
Keep the original spelling, punctuation and language; do not translate or summarize. \
Mark illegible words as [illegible]. \
Output only the transcription, with no commentary.";

/// Resolve the instruction text for a run.
///
/// Inline text wins over a file; both fall back to `DEFAULT_INSTRUCTIONS`.
pub fn resolve_instructions(inline: Option<&str>, file: Option<&Path>) -> Result<String, PipelineError> {
    if let Some(text) = inline.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(text.to_string());
    }
    if let Some(path) = file {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read instructions file {}: {e}", path.display()))
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Config(format!(
                "instructions file {} is empty",
                path.display()
            )));
        }
        return Ok(text.to_string());
    }
    Ok(DEFAULT_INSTRUCTIONS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_configured() {
        assert_eq!(resolve_instructions(None, None).unwrap(), DEFAULT_INSTRUCTIONS);
        assert_eq!(resolve_instructions(Some("   "), None).unwrap(), DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn inline_text_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "from file").unwrap();
        assert_eq!(
            resolve_instructions(Some("inline"), Some(&path)).unwrap(),
            "inline"
        );
    }

    #[test]
    fn reads_file_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "  Transcribe the ledger columns.\n").unwrap();
        assert_eq!(
            resolve_instructions(None, Some(&path)).unwrap(),
            "Transcribe the ledger columns."
        );
    }

    #[test]
    fn missing_or_empty_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            resolve_instructions(None, Some(&missing)),
            Err(PipelineError::Config(_))
        ));
        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "\n").unwrap();
        assert!(matches!(
            resolve_instructions(None, Some(&empty)),
            Err(PipelineError::Config(_))
        ));
    }
}
