//! Wire types for the session and generation endpoints.

pub mod common;
pub mod generate;
pub mod sessions;

pub use generate::{GenerateForm, GenerateResponse};
pub use sessions::{
    CloseSessionQuery, OpenSessionQuery, SessionResponse, SessionSummary, SessionsResponse,
};
