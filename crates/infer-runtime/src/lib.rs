//! # infer-runtime
//!
//! Reference backend for the inference gateway: a deterministic [`ToyModel`], a
//! [`WordTokenizer`] to pair with it, and the [`Sampler`] that turns logits into
//! tokens according to [`infer_engine::GenerationParams`].

pub mod sampler;
pub mod tokenizer;
pub mod toy;

pub use sampler::{Sampler, SamplingError};
pub use tokenizer::{WordTokenizer, DEFAULT_VOCABULARY, EOS_TOKEN, UNK_TOKEN};
pub use toy::ToyModel;
