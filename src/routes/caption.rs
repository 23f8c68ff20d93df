use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::caption::{CaptionRequest, SubmitResponse};
use crate::models::job::JobView;
use crate::routes::error::ApiError;
use crate::services::dispatcher::JobInput;

/// POST /caption — queue a caption job.
///
/// Accepts `application/json` (`{"image_url": ...}`) or `multipart/form-data`
/// with a `file`/`image` part and/or an `image_url` field. A file wins when
/// both are present.
pub async fn submit_caption(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<SubmitResponse>, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let input = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(body) = Json::<CaptionRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        body.validate()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        body.image_url.map(JobInput::Reference)
    };

    let task_id = state.dispatcher.submit(input).await?;
    Ok(Json(SubmitResponse { task_id }))
}

async fn read_multipart(mut multipart: Multipart) -> Result<Option<JobInput>, ApiError> {
    let mut upload: Option<Vec<u8>> = None;
    let mut reference: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        match field.name() {
            Some("file") | Some("image") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if data.is_empty() {
                    continue;
                }

                // Validate image format using the `image` crate
                image::guess_format(&data).map_err(|_| ApiError::UnsupportedMedia)?;
                upload = Some(data.to_vec());
            }
            Some("image_url") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                reference = Some(text);
            }
            _ => {}
        }
    }

    Ok(upload
        .map(JobInput::Upload)
        .or(reference.map(JobInput::Reference)))
}

/// GET /result/{task_id} — current state of a caption job.
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let view = state.poller.poll(&task_id).await?;
    Ok(Json(view))
}
