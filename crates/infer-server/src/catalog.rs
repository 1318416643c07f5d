//! Model directory: catalog name → (model, tokenizer).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use infer_engine::{LanguageModel, Tokenizer};
use infer_runtime::{ToyModel, WordTokenizer, DEFAULT_VOCABULARY};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// A model paired with the tokenizer that produced its vocabulary.
#[derive(Clone)]
pub struct ModelEntry {
    pub name: String,
    pub model: Arc<dyn LanguageModel>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

/// Immutable after startup; shared by the registry and the dispatcher.
pub struct ModelCatalog {
    default_model: String,
    models: BTreeMap<String, ModelEntry>,
}

impl ModelCatalog {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            models: BTreeMap::new(),
        }
    }

    pub fn with_model(
        mut self,
        name: impl Into<String>,
        model: Arc<dyn LanguageModel>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        let name = name.into();
        self.models.insert(
            name.clone(),
            ModelEntry {
                name,
                model,
                tokenizer,
            },
        );
        self
    }

    /// Build the reference backend for every configured model.
    pub fn from_config(config: &ServerConfig) -> Self {
        config
            .models
            .iter()
            .fold(Self::new(&config.default_model), |catalog, spec| {
                let tokenizer = match &spec.vocabulary {
                    Some(words) => WordTokenizer::new(words.as_slice()),
                    None => WordTokenizer::new(DEFAULT_VOCABULARY),
                };
                let model = ToyModel::new(&spec.name, tokenizer.base_len())
                    .with_step_delay(Duration::from_millis(spec.step_delay_ms));
                tracing::info!(
                    model = %spec.name,
                    vocab = tokenizer.base_len(),
                    step_delay_ms = spec.step_delay_ms,
                    "registered model"
                );
                catalog.with_model(&spec.name, Arc::new(model), Arc::new(tokenizer))
            })
    }

    pub fn resolve(&self, name: &str) -> Result<ModelEntry> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownModel(name.to_string()))
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn resolve_default(&self) -> Result<ModelEntry> {
        self.resolve(&self.default_model)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
