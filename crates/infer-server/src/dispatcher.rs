//! Generation dispatcher: binds a request to its model and (optionally) its session,
//! then runs the model on a blocking worker.

use std::sync::Arc;
use std::time::Instant;

use infer_engine::{GenerationParams, LanguageModel, TokenId};
use tracing::{debug, info};

use crate::catalog::{ModelCatalog, ModelEntry};
use crate::error::{Result, ServerError};
use crate::registry::{SessionId, SessionLease, SessionRegistry};

/// One generation request, already parsed from the wire.
#[derive(Debug, Clone, Default)]
pub struct GenerateCall {
    /// Catalog name. When absent the session's model is used, or the default model for
    /// sessionless calls.
    pub model: Option<String>,
    /// Text appended to the context. Absent means no new input tokens.
    pub inputs: Option<String>,
    pub session_id: Option<SessionId>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone)]
pub struct GenerateOutput {
    /// Decoded text of the newly generated tokens only.
    pub outputs: String,
    pub session_id: Option<SessionId>,
    pub new_tokens: usize,
}

/// How a call relates to the registry, decided once up front.
enum Binding {
    Session(SessionLease),
    Unbound,
}

pub struct GenerationDispatcher {
    catalog: Arc<ModelCatalog>,
    registry: Arc<SessionRegistry>,
}

impl GenerationDispatcher {
    pub fn new(catalog: Arc<ModelCatalog>, registry: Arc<SessionRegistry>) -> Self {
        Self { catalog, registry }
    }

    pub async fn generate(&self, call: GenerateCall) -> Result<GenerateOutput> {
        let GenerateCall {
            model,
            inputs,
            session_id,
            params,
        } = call;

        let requested = model.as_deref().map(|name| self.catalog.resolve(name)).transpose()?;
        params.validate()?;

        let binding = match &session_id {
            Some(id) => Binding::Session(self.registry.touch_and_lock(id).await?),
            None => Binding::Unbound,
        };

        let entry = match (&binding, requested) {
            (Binding::Session(lease), Some(entry)) => {
                if lease.model_name() != entry.name {
                    return Err(ServerError::InvalidRequest(format!(
                        "session {} belongs to model {:?}, not {:?}",
                        lease.id(),
                        lease.model_name(),
                        entry.name
                    )));
                }
                entry
            }
            (Binding::Session(lease), None) => self.catalog.resolve(lease.model_name())?,
            (Binding::Unbound, Some(entry)) => entry,
            (Binding::Unbound, None) => self.catalog.resolve_default()?,
        };

        let input_ids = match inputs.as_deref() {
            Some(text) => entry.tokenizer.encode(text)?,
            None => Vec::new(),
        };
        let n_inputs = input_ids.len();

        let started = Instant::now();
        let generated = run_blocking(&entry, input_ids, params, binding).await?;
        let outputs = entry.tokenizer.decode(&generated)?;

        info!(
            model = %entry.name,
            session = ?session_id.map(|id| id.to_string()),
            n_inputs,
            new_tokens = generated.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated"
        );

        Ok(GenerateOutput {
            outputs,
            session_id,
            new_tokens: generated.len(),
        })
    }
}

/// Run the model off the async runtime. The lease travels into the worker, so the
/// session lock is held exactly as long as the model runs and is released however
/// the worker ends. If the caller is cancelled the worker still finishes and then
/// drops the lease.
async fn run_blocking(
    entry: &ModelEntry,
    input_ids: Vec<TokenId>,
    params: GenerationParams,
    binding: Binding,
) -> Result<Vec<TokenId>> {
    let model: Arc<dyn LanguageModel> = Arc::clone(&entry.model);
    let worker = tokio::task::spawn_blocking(move || match binding {
        Binding::Session(mut lease) => {
            debug!(session = %lease.id(), position = lease.position(), "running bound generation");
            model.generate(&input_ids, &params, Some(&mut *lease))
        }
        Binding::Unbound => model.generate(&input_ids, &params, None),
    });

    match worker.await {
        Ok(result) => Ok(result?),
        Err(join) if join.is_panic() => Err(ServerError::Generation(
            infer_engine::EngineError::Inference("generation worker panicked".into()),
        )),
        Err(join) => Err(ServerError::Internal(format!("generation worker failed: {join}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::registry::RegistryLimits;
    use infer_runtime::{ToyModel, WordTokenizer};
    use std::time::Duration;

    fn dispatcher() -> (Arc<SessionRegistry>, GenerationDispatcher) {
        let mut catalog = ModelCatalog::new("a");
        for name in ["a", "b"] {
            let tokenizer = WordTokenizer::default();
            let model = ToyModel::new(name, tokenizer.base_len());
            catalog = catalog.with_model(name, Arc::new(model), Arc::new(tokenizer));
        }
        let catalog = Arc::new(catalog);
        let limits = RegistryLimits {
            max_sessions: 4,
            step_timeout: Duration::from_secs(60),
            lock_timeout: None,
        };
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&catalog),
            limits,
            Arc::new(MonotonicClock),
        ));
        let dispatcher = GenerationDispatcher::new(catalog, Arc::clone(&registry));
        (registry, dispatcher)
    }

    fn greedy(max_new_tokens: usize) -> GenerationParams {
        GenerationParams {
            max_new_tokens: Some(max_new_tokens),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sessionless_generation_uses_default_model() {
        let (registry, dispatcher) = dispatcher();
        let out = dispatcher
            .generate(GenerateCall {
                inputs: Some("the quick brown fox".into()),
                params: greedy(4),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(out.new_tokens <= 4);
        assert!(out.session_id.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn session_model_is_inferred_and_checked() {
        let (registry, dispatcher) = dispatcher();
        let id = registry.open("b", 64).await.unwrap();

        let out = dispatcher
            .generate(GenerateCall {
                inputs: Some("hello".into()),
                session_id: Some(id),
                params: greedy(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(out.session_id, Some(id));

        let err = dispatcher
            .generate(GenerateCall {
                model: Some("a".into()),
                inputs: Some("hello".into()),
                session_id: Some(id),
                params: greedy(2),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_touching_sessions() {
        let (_registry, dispatcher) = dispatcher();
        let err = dispatcher
            .generate(GenerateCall {
                model: Some("zzz".into()),
                session_id: Some(SessionId::new()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn invalid_params_are_rejected() {
        let (_registry, dispatcher) = dispatcher();
        let err = dispatcher
            .generate(GenerateCall {
                inputs: Some("hello".into()),
                params: GenerationParams {
                    do_sample: true,
                    top_p: Some(1.5),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "generation_failure");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_generation_keeps_session_usable() {
        let (registry, dispatcher) = dispatcher();
        let id = registry.open("a", 4).await.unwrap();

        let err = dispatcher
            .generate(GenerateCall {
                inputs: Some("hello".into()),
                session_id: Some(id),
                params: greedy(10),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Generation(_)));

        dispatcher
            .generate(GenerateCall {
                inputs: Some("hello".into()),
                session_id: Some(id),
                params: greedy(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
