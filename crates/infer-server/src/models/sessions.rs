//! Session open/close/list request and response types.

use serde::{Deserialize, Serialize};

use crate::registry::{SessionId, SessionInfo};

/// Query for `GET /api/v1/open_inference_session`.
#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionQuery {
    pub model: Option<String>,
    pub max_length: Option<usize>,
}

/// Query for `GET /api/v1/close_inference_session`.
#[derive(Debug, Default, Deserialize)]
pub struct CloseSessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub session_id: String,
}

impl SessionResponse {
    pub fn new(id: SessionId) -> Self {
        Self {
            ok: true,
            session_id: id.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub model: String,
    pub max_length: usize,
    pub age_secs: f64,
    pub expires_in_secs: f64,
}

impl From<SessionInfo> for SessionSummary {
    fn from(info: SessionInfo) -> Self {
        Self {
            session_id: info.id.to_string(),
            model: info.model,
            max_length: info.max_length,
            age_secs: info.age.as_secs_f64(),
            expires_in_secs: info.expires_in.as_secs_f64(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub ok: bool,
    pub sessions: Vec<SessionSummary>,
    pub active: usize,
    pub max_sessions: usize,
}
