//! `POST /api/v1/generate` form fields and response.

use infer_engine::GenerationParams;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatcher::GenerateCall;
use crate::error::Result;
use crate::models::common::{non_blank, parse_session_id};

/// Generation request fields, from the query string and/or a urlencoded body.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateForm {
    pub model: Option<String>,
    pub inputs: Option<String>,
    pub session_id: Option<String>,
    /// Nonzero enables sampling; zero or absent decodes greedily.
    pub do_sample: Option<i64>,
    pub temperature: Option<f32>,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    pub max_length: Option<usize>,
    pub max_new_tokens: Option<usize>,
    /// Fixes the sampling RNG; a fresh seed is drawn per request otherwise.
    pub seed: Option<u64>,
}

impl GenerateForm {
    /// Field-wise merge; values present in `self` win.
    pub fn or(self, other: GenerateForm) -> GenerateForm {
        GenerateForm {
            model: self.model.or(other.model),
            inputs: self.inputs.or(other.inputs),
            session_id: self.session_id.or(other.session_id),
            do_sample: self.do_sample.or(other.do_sample),
            temperature: self.temperature.or(other.temperature),
            top_k: self.top_k.or(other.top_k),
            top_p: self.top_p.or(other.top_p),
            max_length: self.max_length.or(other.max_length),
            max_new_tokens: self.max_new_tokens.or(other.max_new_tokens),
            seed: self.seed.or(other.seed),
        }
    }

    pub fn into_call(self) -> Result<GenerateCall> {
        let defaults = GenerationParams::default();
        let params = GenerationParams {
            do_sample: self.do_sample.unwrap_or(0) != 0,
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_k: self.top_k,
            top_p: self.top_p,
            max_length: self.max_length,
            max_new_tokens: self.max_new_tokens,
            seed: self
                .seed
                .unwrap_or_else(|| Uuid::new_v4().as_u64_pair().0),
        };
        Ok(GenerateCall {
            model: non_blank(self.model),
            inputs: self.inputs,
            session_id: parse_session_id(self.session_id)?,
            params,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub ok: bool,
    pub outputs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_defaults_to_greedy() {
        let call = GenerateForm {
            inputs: Some("hi".into()),
            seed: Some(7),
            ..Default::default()
        }
        .into_call()
        .unwrap();
        assert!(!call.params.do_sample);
        assert_eq!(call.params.temperature, 1.0);
        assert_eq!(call.params.seed, 7);
        assert!(call.model.is_none());
        assert!(call.session_id.is_none());
    }

    #[test]
    fn merge_prefers_left_fields() {
        let query = GenerateForm {
            inputs: Some("from query".into()),
            ..Default::default()
        };
        let body = GenerateForm {
            inputs: Some("from body".into()),
            max_new_tokens: Some(3),
            ..Default::default()
        };
        let merged = query.or(body);
        assert_eq!(merged.inputs.as_deref(), Some("from query"));
        assert_eq!(merged.max_new_tokens, Some(3));
    }

    #[test]
    fn nonzero_do_sample_enables_sampling() {
        let call = GenerateForm {
            do_sample: Some(1),
            top_k: Some(5),
            model: Some("".into()),
            ..Default::default()
        }
        .into_call()
        .unwrap();
        assert!(call.params.do_sample);
        assert_eq!(call.params.top_k, Some(5));
        assert!(call.model.is_none());
    }
}
