//! # infer-engine
//!
//! The "narrow waist" of the inference gateway. Defines the [`LanguageModel`] and
//! [`Tokenizer`] traits and the types they exchange. The session registry and the
//! HTTP layer only ever talk to a model through these traits, so a remote or
//! accelerated backend can be swapped in without touching the gateway.
//!
//! ## Design Notes
//!
//! ### Session ownership
//! A [`Session`] is plain owned state (token history plus its length budget).
//! [`LanguageModel::close_session`] consumes it, so a session cannot be closed twice
//! and cannot be used after it was closed.
//!
//! ### Shared access
//! Trait methods take `&self`. Models are shared across request handlers through
//! `Arc<dyn LanguageModel>`; any backend state that must be mutated lives behind the
//! backend's own interior mutability. State that belongs to one conversation lives in
//! the `Session` and is passed in by `&mut`.

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Default total length budget when neither `max_length` nor `max_new_tokens` is set.
pub const DEFAULT_MAX_LENGTH: usize = 20;

/// Upper bound accepted for `max_length` and `max_new_tokens` in one call.
pub const MAX_GENERATION_LENGTH: usize = 65_536;

/// Top-level error type for all engine operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),
}

/// Per-conversation state owned by whoever opened it.
///
/// Sessions are intentionally not `Clone`: cloning would duplicate conversation
/// state and break the "closed exactly once" rule.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID for tracking and logging.
    pub id: uuid::Uuid,
    max_length: usize,
    history: Vec<TokenId>,
}

impl Session {
    /// Create an empty session that may hold at most `max_length` tokens.
    pub fn new(max_length: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            max_length,
            history: Vec::new(),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Tokens consumed or produced so far, oldest first.
    pub fn history(&self) -> &[TokenId] {
        &self.history
    }

    /// Number of tokens already in the session.
    pub fn position(&self) -> usize {
        self.history.len()
    }

    /// Tokens that still fit before the session is full.
    pub fn remaining(&self) -> usize {
        self.max_length.saturating_sub(self.history.len())
    }

    /// Append tokens to the history. Fails without modifying the session if they
    /// would not fit.
    pub fn extend(&mut self, tokens: &[TokenId]) -> Result<()> {
        if tokens.len() > self.remaining() {
            return Err(EngineError::Inference(format!(
                "session {} is full: {} of {} tokens used, {} more requested",
                self.id,
                self.history.len(),
                self.max_length,
                tokens.len()
            )));
        }
        self.history.extend_from_slice(tokens);
        Ok(())
    }
}

/// Knobs for a single `generate` call, mirroring the HTTP `generate` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Sample from the distribution; when false, decode greedily.
    pub do_sample: bool,
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    /// Total length (context + new tokens) to stop at.
    pub max_length: Option<usize>,
    /// Number of new tokens to generate. Takes precedence over `max_length`.
    pub max_new_tokens: Option<usize>,
    /// RNG seed used when `do_sample` is set.
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            do_sample: false,
            temperature: 1.0,
            top_k: None,
            top_p: None,
            max_length: None,
            max_new_tokens: None,
            seed: 42,
        }
    }
}

impl GenerationParams {
    /// Reject parameter combinations no backend can honour.
    pub fn validate(&self) -> Result<()> {
        if self.temperature <= 0.0 || !self.temperature.is_finite() {
            return Err(EngineError::InvalidParams(format!(
                "temperature must be positive (got {})",
                self.temperature
            )));
        }
        if self.top_k == Some(0) {
            return Err(EngineError::InvalidParams(
                "top_k must be at least 1".to_string(),
            ));
        }
        for (field, value) in [
            ("max_length", self.max_length),
            ("max_new_tokens", self.max_new_tokens),
        ] {
            if value.is_some_and(|v| v > MAX_GENERATION_LENGTH) {
                return Err(EngineError::InvalidParams(format!(
                    "{field} must be at most {MAX_GENERATION_LENGTH}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(EngineError::InvalidParams(format!(
                    "top_p must be in (0, 1] (got {p})"
                )));
            }
        }
        Ok(())
    }

    /// Number of tokens to generate after a context of `context_len` tokens.
    pub fn new_token_budget(&self, context_len: usize) -> usize {
        match (self.max_new_tokens, self.max_length) {
            (Some(n), _) => n,
            (None, Some(total)) => total.saturating_sub(context_len),
            (None, None) => DEFAULT_MAX_LENGTH.saturating_sub(context_len),
        }
    }
}

/// Text ↔ token conversion paired with a model in the catalog.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of token IDs.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Decode token IDs back into text.
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;

    /// Current vocabulary size.
    fn vocab_size(&self) -> usize;
}

/// The generation capability the gateway exposes.
///
/// `open_session` must be fast: the registry calls it while holding its global
/// critical section.
pub trait LanguageModel: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Open a fresh stateful session holding at most `max_length` tokens.
    fn open_session(&self, max_length: usize) -> Result<Session>;

    /// Release a session. Consumes it; this is the only way a session ends.
    fn close_session(&self, session: Session) -> Result<()>;

    /// Generate a continuation of `inputs`. With a session, the context is the
    /// session history followed by `inputs`, and both inputs and outputs are appended
    /// to the session. Returns only the newly generated tokens.
    fn generate(
        &self,
        inputs: &[TokenId],
        params: &GenerationParams,
        session: Option<&mut Session>,
    ) -> Result<Vec<TokenId>>;
}
