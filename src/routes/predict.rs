use crate::{
    auth::CurrentUser,
    flash::{set_flash, Flash, FlashLevel},
    prediction::{PredictionError, UploadedImage},
    server::AppState,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use tracing::instrument;

const UPLOAD_FIELD: &str = "imagefile";
const TOO_LARGE_MESSAGE: &str = "Image is too large.";

async fn read_upload(multipart: &mut Multipart) -> Result<Option<UploadedImage>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            let filename = field.file_name().map(str::to_string);
            let data = field.bytes().await?;
            return Ok(Some(UploadedImage { filename, data }));
        }
    }
    Ok(None)
}

#[instrument(skip(state, user, jar, multipart), fields(user_id = user.id))]
pub async fn predict(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: SignedCookieJar,
    mut multipart: Multipart,
) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            tracing::warn!("Malformed upload: {}", e);
            let message = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                TOO_LARGE_MESSAGE.to_string()
            } else {
                PredictionError::NoImage.to_string()
            };
            let flash = Flash::new(FlashLevel::Danger, message);
            return (set_flash(jar, flash), Redirect::to("/")).into_response();
        }
    };

    match state.prediction_service.predict(upload, &user).await {
        Ok(result) => state.views.result_page(&result).into_response(),
        Err(err) => {
            let message = if err.is_user_error() {
                tracing::warn!("Rejected upload: {}", err);
                err.to_string()
            } else {
                tracing::error!("Prediction failed: {}", err);
                "Prediction failed, please try another image.".to_string()
            };
            let flash = Flash::new(FlashLevel::Danger, message);
            (set_flash(jar, flash), Redirect::to("/")).into_response()
        }
    }
}
