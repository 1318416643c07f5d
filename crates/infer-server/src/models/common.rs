//! Helpers shared by the request types.

use crate::error::{Result, ServerError};
use crate::registry::SessionId;

/// HTML forms submit untouched fields as empty strings; treat those as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn parse_session_id(value: Option<String>) -> Result<Option<SessionId>> {
    non_blank(value).map(|raw| raw.parse()).transpose()
}

pub(crate) fn require_session_id(value: Option<String>) -> Result<SessionId> {
    parse_session_id(value)?
        .ok_or_else(|| ServerError::InvalidRequest("session_id is required".into()))
}
