use crate::{
    db::{Database, DbError, User},
    server::AppState,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::FromRequestParts, http::request::Parts, response::Redirect};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Username and password are required.")]
    MissingCredentials,
    #[error("This user already exists.")]
    UsernameTaken,
    #[error("Invalid username or password.")]
    InvalidCredentials,
    #[error("Password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
    #[error("Database error: {0}")]
    Db(DbError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<DbError> for AuthError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateUsername(_) => AuthError::UsernameTaken,
            other => AuthError::Db(other),
        }
    }
}

impl AuthError {
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AuthError::MissingCredentials | AuthError::UsernameTaken | AuthError::InvalidCredentials
        )
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(AuthError::Hash)
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(password_hash).map_err(AuthError::Hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Hash(e)),
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    user_id: i64,
    issued_at: Instant,
}

/// Server side session table: token -> user id. Tokens expire `ttl` after issue.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, user_id: i64) -> Uuid {
        self.create_at(user_id, Instant::now())
    }

    fn create_at(&self, user_id: i64, now: Instant) -> Uuid {
        let token = Uuid::new_v4();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        if sessions.len() < before {
            tracing::debug!("Pruned {} expired sessions", before - sessions.len());
        }
        sessions.insert(
            token,
            Session {
                user_id,
                issued_at: now,
            },
        );
        token
    }

    pub fn user_id(&self, token: &Uuid) -> Option<i64> {
        self.user_id_at(token, Instant::now())
    }

    fn user_id_at(&self, token: &Uuid, now: Instant) -> Option<i64> {
        self.sessions
            .read()
            .get(token)
            .filter(|session| !self.is_expired(session, now))
            .map(|session| session.user_id)
    }

    pub fn remove(&self, token: &Uuid) -> Option<i64> {
        self.sessions.write().remove(token).map(|session| session.user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.issued_at) >= self.ttl
    }
}

pub struct AuthService {
    db: Database,
    sessions: SessionStore,
}

impl AuthService {
    pub fn new(db: Database, session_ttl: Duration) -> Self {
        Self {
            db,
            sessions: SessionStore::new(session_ttl),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if self.db.find_user_by_name(username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
        let user = self.db.create_user(username, &password_hash).await?;

        tracing::info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Verifies the credentials and opens a session for the user.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<(Uuid, User), AuthError> {
        let user = self
            .db
            .find_user_by_name(username.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let password = password.to_string();
        let password_hash = user.password_hash.clone();
        let verified =
            tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
                .await??;
        if !verified {
            tracing::warn!("Rejected login for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.sessions.create(user.id);
        tracing::info!("User {} logged in", user.id);
        Ok((token, user))
    }

    pub fn logout(&self, token: &Uuid) {
        if let Some(user_id) = self.sessions.remove(token) {
            tracing::info!("User {} logged out", user_id);
        }
    }

    pub async fn resolve(&self, token: &Uuid) -> Result<Option<User>, AuthError> {
        match self.sessions.user_id(token) {
            Some(user_id) => Ok(self.db.find_user_by_id(user_id).await?),
            None => Ok(None),
        }
    }
}

pub fn session_token(jar: &SignedCookieJar) -> Option<Uuid> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

pub fn session_cookie(token: Uuid) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Authenticated user of the current request; anything else is sent to `/login`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = SignedCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
        let Some(token) = session_token(&jar) else {
            return Err(Redirect::to("/login"));
        };

        match state.auth.resolve(&token).await {
            Ok(Some(user)) => Ok(CurrentUser(user)),
            Ok(None) => Err(Redirect::to("/login")),
            Err(e) => {
                tracing::error!("Failed to resolve session: {}", e);
                Err(Redirect::to("/login"))
            }
        }
    }
}
