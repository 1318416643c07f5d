//! HTTP request handlers for API endpoints.

pub mod generate;
pub mod health;
pub mod sessions;

pub use generate::handle_generate;
pub use health::handle_health;
pub use sessions::{handle_close_session, handle_list_sessions, handle_open_session};
