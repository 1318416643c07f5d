//! # infer-server
//!
//! HTTP gateway for stateful text generation.
//!
//! Clients open an inference session against a catalog model, run any number of
//! `generate` calls that continue its context, and close it. Sessions are capped in
//! number, expire after a period of inactivity, and serialize the generations issued
//! against them; sessionless generation is stateless and touches no registry entry.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod server;
pub mod state;
pub mod timed_store;

pub use catalog::{ModelCatalog, ModelEntry};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, ModelConfig, ServerConfig};
pub use dispatcher::{GenerateCall, GenerateOutput, GenerationDispatcher};
pub use error::ServerError;
pub use registry::{RegistryLimits, SessionId, SessionInfo, SessionLease, SessionRegistry};
pub use server::{create_router, run_server};
pub use state::AppState;
