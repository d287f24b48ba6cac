use crate::{
    auth::{session_cookie, session_token, AuthError, CurrentUser, SESSION_COOKIE},
    flash::{set_flash, take_flash, Flash, FlashLevel},
    server::AppState,
    views::ViewError,
};
use axum::{
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use serde::Deserialize;
use tracing::instrument;

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn auth_failure(err: &AuthError) -> Flash {
    if err.is_user_error() {
        tracing::warn!("Rejected auth request: {}", err);
        Flash::new(FlashLevel::Danger, err.to_string())
    } else {
        tracing::error!("Auth request failed: {}", err);
        Flash::new(FlashLevel::Danger, "Something went wrong, please try again.")
    }
}

pub async fn login_page(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    if let Some(token) = session_token(&jar) {
        if let Ok(Some(_)) = state.auth.resolve(&token).await {
            return Redirect::to("/").into_response();
        }
    }
    let (jar, flash) = take_flash(jar);
    match state.views.login_page(flash.as_ref()) {
        Ok(page) => (jar, page).into_response(),
        Err(e) => e.into_response(),
    }
}

#[instrument(skip(state, jar, form), fields(username = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<Credentials>,
) -> (SignedCookieJar, Redirect) {
    match state.auth.login(&form.username, &form.password).await {
        Ok((token, _user)) => {
            // The browser's previous session, if any, is replaced.
            if let Some(previous) = session_token(&jar) {
                state.auth.logout(&previous);
            }
            let jar = jar.add(session_cookie(token));
            let jar = set_flash(jar, Flash::new(FlashLevel::Success, "Logged in successfully!"));
            (jar, Redirect::to("/"))
        }
        Err(err) => (set_flash(jar, auth_failure(&err)), Redirect::to("/login")),
    }
}

pub async fn register_page(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Html<String>), ViewError> {
    let (jar, flash) = take_flash(jar);
    let page = state.views.register_page(flash.as_ref())?;
    Ok((jar, page))
}

#[instrument(skip(state, jar, form), fields(username = %form.username))]
pub async fn register(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<Credentials>,
) -> (SignedCookieJar, Redirect) {
    match state.auth.register(&form.username, &form.password).await {
        Ok(_) => {
            let flash = Flash::new(FlashLevel::Success, "Account created successfully!");
            (set_flash(jar, flash), Redirect::to("/login"))
        }
        Err(err) => (set_flash(jar, auth_failure(&err)), Redirect::to("/register")),
    }
}

pub async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Redirect) {
    if let Some(token) = session_token(&jar) {
        state.auth.logout(&token);
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    let jar = set_flash(jar, Flash::new(FlashLevel::Info, "Logged out."));
    (jar, Redirect::to("/login"))
}
