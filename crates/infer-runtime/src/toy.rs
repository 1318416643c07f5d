//! Deterministic toy language model.
//!
//! Logits are a fixed function of the context tokens, so greedy decoding always
//! produces the same continuation for the same context. The model is useful for
//! exercising the gateway end to end; it knows nothing about language.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use infer_engine::{EngineError, GenerationParams, LanguageModel, Result, Session, TokenId};

use crate::sampler::Sampler;
use crate::tokenizer::{EOS_TOKEN, UNK_TOKEN};

/// Number of trailing context tokens that influence the next token.
const CONTEXT_WINDOW: usize = 8;

pub struct ToyModel {
    name: String,
    vocab_size: usize,
    step_delay: Duration,
    open_sessions: AtomicUsize,
}

impl ToyModel {
    /// `vocab_size` bounds the generated ids; pair it with the tokenizer's base length.
    pub fn new(name: impl Into<String>, vocab_size: usize) -> Self {
        Self {
            name: name.into(),
            vocab_size,
            step_delay: Duration::ZERO,
            open_sessions: AtomicUsize::new(0),
        }
    }

    /// Sleep this long per generated token, simulating a remote forward pass.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn forward(&self, context: &[TokenId]) -> Vec<f32> {
        let window = &context[context.len().saturating_sub(CONTEXT_WINDOW)..];
        let mut logits = vec![0.0f32; self.vocab_size];
        for (i, logit) in logits.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (pos, &tid) in window.iter().enumerate() {
                acc += ((tid as f32 + 1.0) * (i as f32 + 1.0) + pos as f32).sin();
            }
            *logit = acc;
        }
        // Keep EOS rare so continuations have some length.
        if let Some(eos) = logits.get_mut(EOS_TOKEN as usize) {
            *eos -= 2.0;
        }
        // Never emit the out-of-vocabulary marker.
        if let Some(unk) = logits.get_mut(UNK_TOKEN as usize) {
            *unk = f32::MIN;
        }
        logits
    }
}

impl LanguageModel for ToyModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&self, max_length: usize) -> Result<Session> {
        if max_length == 0 {
            return Err(EngineError::InvalidParams(
                "session max_length must be positive".to_string(),
            ));
        }
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(max_length))
    }

    fn close_session(&self, session: Session) -> Result<()> {
        tracing::debug!(model = %self.name, session = %session.id, tokens = session.position(), "closing session");
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn generate(
        &self,
        inputs: &[TokenId],
        params: &GenerationParams,
        session: Option<&mut Session>,
    ) -> Result<Vec<TokenId>> {
        params.validate()?;

        let mut context: Vec<TokenId> = match &session {
            Some(s) => s.history().to_vec(),
            None => Vec::new(),
        };
        context.extend_from_slice(inputs);
        if context.is_empty() {
            return Err(EngineError::Inference(
                "no inputs and no session history to continue from".to_string(),
            ));
        }

        let budget = params.new_token_budget(context.len());
        if let Some(s) = &session {
            let needed = inputs.len().checked_add(budget);
            if needed.map_or(true, |n| n > s.remaining()) {
                return Err(EngineError::Inference(format!(
                    "session max_length {} exceeded: {} tokens used, {} inputs, {} new tokens requested",
                    s.max_length(),
                    s.position(),
                    inputs.len(),
                    budget
                )));
            }
        }

        let mut sampler = Sampler::from_params(params);
        let mut generated = Vec::new();
        for _ in 0..budget {
            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }
            let logits = self.forward(&context);
            let token = sampler
                .sample(&logits)
                .map_err(|e| EngineError::Inference(e.to_string()))? as TokenId;
            if token == EOS_TOKEN {
                break;
            }
            generated.push(token);
            context.push(token);
        }

        if let Some(s) = session {
            s.extend(inputs)?;
            s.extend(&generated)?;
        }
        Ok(generated)
    }
}
