use crate::{auth::CurrentUser, server::AppState};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// Serves a stored image to the user whose prediction references it.
pub async fn serve_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(key): Path<String>,
) -> Response {
    match state.db.user_owns_image(user.id, &key).await {
        Ok(true) => {}
        Ok(false) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Upload lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.uploads.read(&key).await {
        Ok(data) => {
            let content_type = image::ImageFormat::from_path(&key)
                .map(|format| format.to_mime_type())
                .unwrap_or("application/octet-stream");
            ([(header::CONTENT_TYPE, content_type)], data).into_response()
        }
        Err(e) => {
            tracing::warn!("Stored image {} unavailable: {}", key, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
