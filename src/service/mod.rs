//! Identity & Data Service boundary.
//!
//! DESIGN
//! ======
//! The service owns credentials, sessions, profile rows and role
//! assignments. `IdentityService` is the seam the session manager talks
//! through: request/response calls plus a broadcast stream of session
//! transitions. `SupabaseClient` is the HTTP implementation; tests use the
//! in-memory double in `memory`.

#[cfg(test)]
pub mod memory;
pub mod supabase;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::types::{Profile, ProfileUpdate, Role, Session, SessionChange, SignUpMetadata};

pub use supabase::SupabaseClient;

/// Capacity of the session-change broadcast channel.
pub const SESSION_EVENT_CAPACITY: usize = 16;

/// Async interface to the external identity service. Enables mocking in tests.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Subscribe to session transitions. Each receiver sees every change sent
    /// after it was created.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;

    /// The session currently persisted by the client, refreshed if expired.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] if stored state cannot be read or refreshed.
    async fn current_session(&self) -> Result<Option<Session>, ServiceError>;

    /// Create an identity. Returns a session only when the service signs the
    /// user in immediately (no email confirmation required).
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] on rejection or transport failure.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
        redirect_to: &str,
    ) -> Result<Option<Session>, ServiceError>;

    /// Password sign-in.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] on bad credentials or transport failure.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ServiceError>;

    /// Revoke and forget the current session.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::SessionMissing`] when no session is held.
    async fn sign_out(&self) -> Result<(), ServiceError>;

    /// Ask the service to mail a password-reset link pointing at `redirect_to`.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] on rejection or transport failure.
    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), ServiceError>;

    /// Fetch the profile row of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] if the row is missing or unreadable.
    async fn get_profile(&self, user_id: Uuid) -> Result<Profile, ServiceError>;

    /// Fetch the roles assigned to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] on transport or permission failure.
    async fn get_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError>;

    /// Apply `update` to the profile of `user_id` and return the stored row.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] on constraint violation or transport failure.
    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> Result<Profile, ServiceError>;
}
