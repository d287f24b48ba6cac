use crate::{auth::CurrentUser, flash::take_flash, server::AppState, views::ViewError};
use axum::{extract::State, response::Html};
use axum_extra::extract::cookie::SignedCookieJar;

pub async fn index(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Html<String>), ViewError> {
    let (jar, flash) = take_flash(jar);
    let page = state.views.home_page(&user.username, flash.as_ref())?;
    Ok((jar, page))
}
