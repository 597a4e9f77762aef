//! Input validation for identifiers and for strings that end up in logs.

use crate::errors::ValidationError;

/// Workflow IDs and execution IDs are hex-encoded 32-byte digests.
pub const WORKFLOW_ID_LEN: usize = 64;

/// Longest remote-supplied string written to a log line.
pub const MAX_LOGGED_STRING_LEN: usize = 256;

/// Check that `id` is a 64-character hex string.
pub fn validate_workflow_or_execution_id(id: &str) -> Result<(), ValidationError> {
    if id.len() != WORKFLOW_ID_LEN {
        return Err(ValidationError::InvalidLength {
            expected: WORKFLOW_ID_LEN,
            actual: id.len(),
        });
    }
    if !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::NotHex);
    }
    Ok(())
}

/// Make a peer-supplied string safe to log.
///
/// Long strings are truncated; strings with unprintable characters are
/// rendered as hex so they cannot forge log lines.
#[must_use]
pub fn sanitize_log_string(s: &str) -> String {
    let (bytes, suffix) = if s.len() > MAX_LOGGED_STRING_LEN {
        (&s.as_bytes()[..MAX_LOGGED_STRING_LEN], " [TRUNCATED]")
    } else {
        (s.as_bytes(), "")
    };

    if bytes.iter().any(|b| !(0x20..0x7f).contains(b)) {
        return format!("[UNPRINTABLE] {}{}", hex::encode(bytes), suffix);
    }
    // all bytes are printable ASCII here
    format!("{}{}", String::from_utf8_lossy(bytes), suffix)
}
