use crate::TransferError;

/// Validates a server-assigned session id before it is used as a file name.
///
/// Rejects:
/// - Empty ids
/// - Ids containing `/`, `\` or NUL
/// - Ids starting with `.` (hidden files, `..`, and the store's temp files)
pub fn validate_session_id(session_id: &str) -> Result<(), TransferError> {
    if session_id.is_empty() {
        return Err(TransferError::InvalidSessionId("empty id".into()));
    }

    if session_id.starts_with('.') {
        return Err(TransferError::InvalidSessionId(format!(
            "leading dot not allowed: {session_id}"
        )));
    }

    if session_id.chars().any(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(TransferError::InvalidSessionId(format!(
            "path separator not allowed: {session_id}"
        )));
    }

    Ok(())
}
