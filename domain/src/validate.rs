//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::CoreError;

/// Validate a link URL. We keep this intentionally light to avoid heavy
/// parsing crates: ensure http/https scheme and a reasonable length.
pub fn validate_link(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidLink("empty".into()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(CoreError::InvalidLink(
            "must start with http:// or https://".into(),
        ));
    }
    if trimmed.len() > 2048 {
        return Err(CoreError::InvalidLink("too long".into()));
    }
    Ok(())
}
