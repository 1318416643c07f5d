//! Generation handler.

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    Form, Json,
};

use crate::{
    error::ServerError,
    models::{GenerateForm, GenerateResponse},
    state::AppState,
};

/// `POST /api/v1/generate` or `GET` with the same fields.
///
/// Fields are read from the query string and, on POST, from a urlencoded body; a field
/// present in both takes the query value. A POST body that is not urlencoded is ignored.
///
/// Bound generations queue on their session's lock; the handler future may be dropped
/// by a disconnecting client while queued or running without leaking the lock.
pub async fn handle_generate(
    State(state): State<AppState>,
    query: Result<Query<GenerateForm>, QueryRejection>,
    body: Result<Form<GenerateForm>, FormRejection>,
) -> Result<Json<GenerateResponse>, ServerError> {
    let Query(query) = query?;
    let body = match body {
        Ok(Form(body)) => body,
        Err(FormRejection::InvalidFormContentType(_)) => GenerateForm::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let call = query.or(body).into_call()?;
    tracing::info!(
        model = ?call.model,
        session = ?call.session_id.map(|id| id.to_string()),
        do_sample = call.params.do_sample,
        max_new_tokens = ?call.params.max_new_tokens,
        "generate()"
    );

    let output = state.dispatcher.generate(call).await?;
    Ok(Json(GenerateResponse {
        ok: true,
        outputs: output.outputs,
        session_id: output.session_id.map(|id| id.to_string()),
    }))
}
