//! HTTP client for a Supabase-style identity service.
//!
//! Auth calls go to the GoTrue endpoints under `/auth/v1`, profile and role
//! rows to PostgREST under `/rest/v1`. Pure parsing lives in free functions
//! (`parse_session`, `parse_roles`, `parse_error_message`) for testability.
//!
//! SESSION STORAGE
//! ===============
//! The client holds the signed-in session itself, mirrors it to an optional
//! JSON file so a later process starts signed in, and refreshes it through
//! the refresh token when `current_session` finds it expired. Every change is
//! broadcast to subscribers.

#[cfg(test)]
#[path = "supabase_test.rs"]
mod tests;

use std::path::PathBuf;
use std::time::Duration;

use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use super::{IdentityService, SESSION_EVENT_CAPACITY};
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::types::{AuthEvent, Profile, ProfileUpdate, Role, Session, SessionChange, SignUpMetadata};

const PGRST_OBJECT: &str = "application/vnd.pgrst.object+json";

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    /// Whether the session file has been read yet.
    loaded: bool,
}

pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session_file: Option<PathBuf>,
    slot: Mutex<SessionSlot>,
    events: broadcast::Sender<SessionChange>,
}

impl SupabaseClient {
    /// Build a client from typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ServiceError::HttpClientBuild(e.to_string()))?;
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Ok(Self {
            http,
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            session_file: config.session_file.clone(),
            slot: Mutex::new(SessionSlot::default()),
            events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn rest_url(&self, table: &str, query: &str) -> String {
        format!("{}/rest/v1/{table}?{query}", self.base_url)
    }

    /// Access token of the held session, else the anon key.
    async fn bearer(&self) -> String {
        let slot = self.slot.lock().await;
        slot.session
            .as_ref()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token.clone())
    }

    fn with_keys(&self, request: RequestBuilder, bearer: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, ServiceError> {
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        if !status.is_success() {
            let message = parse_error_message(&text).unwrap_or_else(|| status.to_string());
            return Err(ServiceError::Api { status: status.as_u16(), message });
        }
        Ok(text)
    }

    /// Replace the held session, persist it, and broadcast the change.
    async fn store(&self, slot: &mut SessionSlot, event: AuthEvent, session: Option<Session>) {
        slot.session.clone_from(&session);
        slot.loaded = true;
        if let Err(e) = self.persist(session.as_ref()).await {
            tracing::warn!(error = %e, "session persistence failed");
        }
        // No receivers is fine; the event is simply dropped.
        let _ = self.events.send(SessionChange { event, session });
    }

    async fn persist(&self, session: Option<&Session>) -> Result<(), ServiceError> {
        let Some(path) = &self.session_file else {
            return Ok(());
        };
        match session {
            Some(session) => {
                let bytes = serde_json::to_vec_pretty(session).map_err(|e| ServiceError::Storage(e.to_string()))?;
                tokio::fs::write(path, bytes)
                    .await
                    .map_err(|e| ServiceError::Storage(e.to_string()))
            }
            None => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ServiceError::Storage(e.to_string())),
            },
        }
    }

    async fn load(&self) -> Result<Option<Session>, ServiceError> {
        let Some(path) = &self.session_file else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ServiceError::Storage(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::Storage(e.to_string())),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, ServiceError> {
        let request = self
            .http
            .post(self.auth_url("token?grant_type=refresh_token"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let text = self.send(self.with_keys(request, &self.anon_key)).await?;
        parse_session(&text, now_unix())
    }
}

#[async_trait::async_trait]
impl IdentityService for SupabaseClient {
    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }

    async fn current_session(&self) -> Result<Option<Session>, ServiceError> {
        let mut slot = self.slot.lock().await;
        if !slot.loaded {
            slot.session = self.load().await?;
            slot.loaded = true;
        }

        let Some(session) = slot.session.clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(now_unix()) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            tracing::info!(user_id = %session.user.id, "stored session expired without refresh token");
            self.store(&mut slot, AuthEvent::SignedOut, None).await;
            return Ok(None);
        };
        match self.refresh(refresh_token).await {
            Ok(fresh) => {
                tracing::debug!(user_id = %fresh.user.id, "session refreshed");
                self.store(&mut slot, AuthEvent::TokenRefreshed, Some(fresh.clone())).await;
                Ok(Some(fresh))
            }
            Err(e) if refresh_rejected(&e) => {
                tracing::info!(error = %e, user_id = %session.user.id, "refresh token rejected; signing out");
                self.store(&mut slot, AuthEvent::SignedOut, None).await;
                Err(e)
            }
            // Transient failure: keep the stored session for the next attempt.
            Err(e) => {
                tracing::warn!(error = %e, "session refresh failed");
                Err(e)
            }
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
        redirect_to: &str,
    ) -> Result<Option<Session>, ServiceError> {
        let request = self
            .http
            .post(self.auth_url("signup"))
            .query(&[("redirect_to", redirect_to)])
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": metadata,
            }));
        let text = self.send(self.with_keys(request, &self.anon_key)).await?;
        let session = parse_sign_up(&text, now_unix())?;
        if let Some(session) = &session {
            let mut slot = self.slot.lock().await;
            self.store(&mut slot, AuthEvent::SignedIn, Some(session.clone())).await;
        }
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        let request = self
            .http
            .post(self.auth_url("token?grant_type=password"))
            .json(&serde_json::json!({ "email": email, "password": password }));
        let text = self.send(self.with_keys(request, &self.anon_key)).await?;
        let session = parse_session(&text, now_unix())?;

        let mut slot = self.slot.lock().await;
        self.store(&mut slot, AuthEvent::SignedIn, Some(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        let mut slot = self.slot.lock().await;
        if !slot.loaded {
            slot.session = self.load().await?;
            slot.loaded = true;
        }
        let Some(session) = slot.session.clone() else {
            return Err(ServiceError::SessionMissing);
        };

        let request = self.http.post(self.auth_url("logout"));
        match self.send(self.with_keys(request, &session.access_token)).await {
            Ok(_) => {}
            // The token is already revoked or expired server-side.
            Err(e) if matches!(e.status(), Some(401 | 404)) => {
                tracing::debug!(error = %e, "logout treated as already signed out");
            }
            Err(e) => return Err(e),
        }
        self.store(&mut slot, AuthEvent::SignedOut, None).await;
        Ok(())
    }

    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), ServiceError> {
        let request = self
            .http
            .post(self.auth_url("recover"))
            .query(&[("redirect_to", redirect_to)])
            .json(&serde_json::json!({ "email": email }));
        self.send(self.with_keys(request, &self.anon_key)).await?;
        Ok(())
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Profile, ServiceError> {
        let bearer = self.bearer().await;
        let request = self
            .http
            .get(self.rest_url("profiles", &format!("id=eq.{user_id}&select=*")))
            .header(ACCEPT, PGRST_OBJECT);
        let text = self.send(self.with_keys(request, &bearer)).await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::Parse(e.to_string()))
    }

    async fn get_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let bearer = self.bearer().await;
        let request = self
            .http
            .get(self.rest_url("user_roles", &format!("user_id=eq.{user_id}&select=role")));
        let text = self.send(self.with_keys(request, &bearer)).await?;
        parse_roles(&text)
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> Result<Profile, ServiceError> {
        let bearer = self.bearer().await;
        let request = self
            .http
            .patch(self.rest_url("profiles", &format!("id=eq.{user_id}")))
            .header(ACCEPT, PGRST_OBJECT)
            .header("Prefer", "return=representation")
            .json(update);
        let text = self.send(self.with_keys(request, &bearer)).await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::Parse(e.to_string()))
    }
}

/// Whether a refresh failure means the refresh token itself is no longer valid.
pub(crate) fn refresh_rejected(err: &ServiceError) -> bool {
    matches!(err.status(), Some(400 | 401))
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// =============================================================================
// PARSING
// =============================================================================

#[derive(serde::Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    session: Session,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Decode a token-endpoint body. `expires_at` is derived from `expires_in`
/// when the service only sends the relative lifetime.
pub(crate) fn parse_session(json: &str, now: i64) -> Result<Session, ServiceError> {
    let resp: TokenResponse = serde_json::from_str(json).map_err(|e| ServiceError::Parse(e.to_string()))?;
    let mut session = resp.session;
    if session.expires_at.is_none() {
        session.expires_at = resp.expires_in.map(|secs| now + secs);
    }
    Ok(session)
}

/// Decode a sign-up body: a full session when the user is signed in at once,
/// a bare user object when email confirmation is pending.
pub(crate) fn parse_sign_up(json: &str, now: i64) -> Result<Option<Session>, ServiceError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| ServiceError::Parse(e.to_string()))?;
    if value.get("access_token").is_some_and(|t| !t.is_null()) {
        parse_session(json, now).map(Some)
    } else {
        Ok(None)
    }
}

#[derive(serde::Deserialize)]
struct RoleRow {
    role: String,
}

/// Decode `user_roles` rows, skipping roles this client does not know.
pub(crate) fn parse_roles(json: &str) -> Result<Vec<Role>, ServiceError> {
    let rows: Vec<RoleRow> = serde_json::from_str(json).map_err(|e| ServiceError::Parse(e.to_string()))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.role.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                tracing::warn!(error = %e, "skipping role row");
                None
            }
        })
        .collect())
}

/// Pull a human-readable message out of an error body.
pub(crate) fn parse_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
