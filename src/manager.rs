//! Session manager: the single owner of the session/user/profile/role cache.
//!
//! ARCHITECTURE
//! ============
//! One `SessionManager` is built at process start and cloned into every
//! consumer. State lives in a `watch` channel so consumers can read a
//! snapshot or await changes. Two sources feed the session handler: the
//! service's session-change stream and a one-off lookup of the persisted
//! session. Both go through `apply_session`.
//!
//! ORDERING
//! ========
//! The handler never calls back into the service. When a new session is
//! recorded, the profile/role fetch is spawned as its own task and runs on a
//! later scheduler turn. Each fetch is tagged with the generation of the
//! session that started it; a result whose generation is no longer current is
//! dropped, so a slow fetch cannot repopulate the cache after sign-out.
//!
//! ERROR HANDLING
//! ==============
//! Operations return `Result<_, AuthError>` and emit a toast for every
//! success or service failure. A failed call leaves the cache exactly as it
//! was. The busy flag is lowered by a drop guard, so errors and cancelled
//! futures cannot leave it raised.

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::AuthError;
use crate::notify::{Notifier, Toast};
use crate::service::{IdentityService, SESSION_EVENT_CAPACITY};
use crate::types::{Profile, ProfileUpdate, Role, Session, SessionChange, SignUpMetadata, User};

/// Number of replaced access tokens remembered for replay filtering. Every
/// replacement follows at least one buffered event, so a replay still queued
/// in the session stream always refers to a remembered token.
const RETIRED_TOKEN_LIMIT: usize = SESSION_EVENT_CAPACITY;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time view of the manager's cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub session: Option<Session>,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub roles: BTreeSet<Role>,
    /// True until the first session resolution; never raised again.
    pub loading: bool,
    /// True while any network operation is in flight.
    pub busy: bool,
    /// True from session establishment until its profile/role fetch settles.
    pub profile_pending: bool,
}

impl AuthSnapshot {
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    #[must_use]
    pub fn is_juriste(&self) -> bool {
        self.has_role(Role::Juriste)
    }

    #[must_use]
    pub fn is_citoyen(&self) -> bool {
        self.has_role(Role::Citoyen)
    }

    /// Menu label of the most privileged cached role; citoyen when none.
    #[must_use]
    pub fn role_label(&self) -> &'static str {
        if self.is_admin() {
            Role::Admin.label()
        } else if self.is_juriste() {
            Role::Juriste.label()
        } else {
            Role::Citoyen.label()
        }
    }
}

/// Redirect targets embedded in emails sent by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirects {
    pub sign_up: String,
    pub reset_password: String,
}

impl Redirects {
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self { sign_up: config.sign_up_redirect(), reset_password: config.reset_password_redirect() }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

struct Inner {
    service: Arc<dyn IdentityService>,
    notifier: Arc<dyn Notifier>,
    redirects: Redirects,
    state: watch::Sender<AuthSnapshot>,
    /// Bumped on every session change; tags profile/role fetches.
    generation: AtomicU64,
    /// Generation whose profile row was written by `update_profile`; its
    /// in-flight fetch must not overwrite that row. Zero means none.
    profile_confirmed: AtomicU64,
    /// Most recently replaced access tokens, oldest first. Events carrying
    /// one are stale replays and are ignored.
    retired: Mutex<VecDeque<String>>,
    in_flight: AtomicUsize,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

/// Cheaply cloneable handle to the process-wide session manager.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build the manager and start tracking the session.
    ///
    /// Subscribes to the service's session stream, then looks up the
    /// persisted session on a separate task. Must be called inside a Tokio
    /// runtime.
    #[must_use]
    pub fn start(service: Arc<dyn IdentityService>, notifier: Arc<dyn Notifier>, redirects: Redirects) -> Self {
        let (state, _) = watch::channel(AuthSnapshot { loading: true, ..AuthSnapshot::default() });
        let manager = Self {
            inner: Arc::new(Inner {
                service,
                notifier,
                redirects,
                state,
                generation: AtomicU64::new(0),
                profile_confirmed: AtomicU64::new(0),
                retired: Mutex::new(VecDeque::with_capacity(RETIRED_TOKEN_LIMIT)),
                in_flight: AtomicUsize::new(0),
                listener: Mutex::new(None),
            }),
        };

        // Subscribe before the lookup so no transition between the two is missed.
        let events = manager.inner.service.subscribe();
        let listener = tokio::spawn(listen(Arc::downgrade(&manager.inner), events));
        if let Ok(mut slot) = manager.inner.listener.lock() {
            *slot = Some(listener);
        }

        let initial = manager.clone();
        tokio::spawn(async move { initial.resolve_initial().await });

        manager
    }

    /// Stop following the session stream. Operations keep working.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.listener.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every later state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    /// Wait until the initial resolution and any pending profile/role fetch
    /// have completed, then return the state.
    pub async fn settled(&self) -> AuthSnapshot {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|s| !s.loading && !s.profile_pending).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.snapshot(),
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    #[must_use]
    pub fn roles(&self) -> BTreeSet<Role> {
        self.inner.state.borrow().roles.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.state.borrow().busy
    }

    /// Cache-only role check; false until the role fetch has landed.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.inner.state.borrow().has_role(role)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    #[must_use]
    pub fn is_juriste(&self) -> bool {
        self.has_role(Role::Juriste)
    }

    #[must_use]
    pub fn is_citoyen(&self) -> bool {
        self.has_role(Role::Citoyen)
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Register a new identity. Returns the session when the service signed
    /// the user in at once; `None` when email confirmation is pending.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Service`] if the service rejects the sign-up.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<Session>, AuthError> {
        let _busy = self.busy();
        let result = self
            .inner
            .service
            .sign_up(email, password, metadata, &self.inner.redirects.sign_up)
            .await;
        match result {
            Ok(session) => {
                tracing::info!(confirmed = session.is_some(), "sign-up accepted");
                if let Some(session) = &session {
                    self.apply_session(Some(session.clone()), false);
                }
                self.notify(Toast::sign_up_succeeded());
                Ok(session)
            }
            Err(e) => {
                tracing::error!(error = %e, "sign-up failed");
                self.notify(Toast::sign_up_failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Password sign-in. On success the session is recorded and the
    /// profile/role fetch is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Service`] on bad credentials or transport failure.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let _busy = self.busy();
        match self.inner.service.sign_in(email, password).await {
            Ok(session) => {
                tracing::info!(user_id = %session.user.id, "signed in");
                self.apply_session(Some(session.clone()), false);
                self.notify(Toast::sign_in_succeeded());
                Ok(session)
            }
            Err(e) => {
                tracing::error!(error = %e, "sign-in failed");
                self.notify(Toast::sign_in_failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Sign out and clear the cache.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Service`] if the service refuses; the cache is
    /// left as it was.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _busy = self.busy();
        match self.inner.service.sign_out().await {
            Ok(()) => {
                tracing::info!("signed out");
                self.apply_session(None, false);
                self.notify(Toast::sign_out_succeeded());
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "sign-out failed");
                self.notify(Toast::sign_out_failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Ask the service to mail a password-reset link. No local state changes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Service`] if the request is rejected.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let _busy = self.busy();
        match self
            .inner
            .service
            .reset_password(email, &self.inner.redirects.reset_password)
            .await
        {
            Ok(()) => {
                tracing::info!("password reset requested");
                self.notify(Toast::reset_email_sent());
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "password reset failed");
                self.notify(Toast::reset_failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Update the signed-in user's profile and cache the row the service returns.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoUser`] without contacting the service when no
    /// one is signed in, or [`AuthError::Service`] if the update is rejected.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, AuthError> {
        let Some(user_id) = self.current_user_id() else {
            tracing::warn!("profile update without a signed-in user");
            return Err(AuthError::NoUser);
        };

        let _busy = self.busy();
        match self.inner.service.update_profile(user_id, update).await {
            Ok(profile) => {
                let cached = self.inner.state.send_if_modified(|s| {
                    if s.user.as_ref().is_some_and(|u| u.id == user_id) {
                        let generation = self.inner.generation.load(Ordering::SeqCst);
                        self.inner.profile_confirmed.store(generation, Ordering::SeqCst);
                        s.profile = Some(profile.clone());
                        true
                    } else {
                        false
                    }
                });
                if !cached {
                    tracing::debug!(%user_id, "user changed during profile update; row not cached");
                }
                self.notify(Toast::profile_updated());
                Ok(profile)
            }
            Err(e) => {
                tracing::error!(error = %e, %user_id, "profile update failed");
                self.notify(Toast::profile_update_failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // SESSION HANDLING
    // =========================================================================

    fn current_user_id(&self) -> Option<Uuid> {
        self.inner.state.borrow().user.as_ref().map(|u| u.id)
    }

    fn notify(&self, toast: Toast) {
        self.inner.notifier.notify(toast);
    }

    fn busy(&self) -> BusyGuard<'_> {
        BusyGuard::enter(&self.inner)
    }

    async fn resolve_initial(&self) {
        let session = match self.inner.service.current_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "persisted session lookup failed; starting signed out");
                None
            }
        };
        self.apply_session(session, true);
    }

    /// Record a session transition. Same session is a no-op; a new one
    /// invalidates the profile/role cache and schedules its refetch.
    ///
    /// With `only_while_loading`, the call is ignored once the state has been
    /// resolved by an earlier transition.
    fn apply_session(&self, session: Option<Session>, only_while_loading: bool) {
        let mut fetch = None;
        self.inner.state.send_if_modified(|s| {
            if only_while_loading && !s.loading {
                tracing::debug!("initial session lookup superseded by session event");
                return false;
            }
            let mut retired = self.inner.retired.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if session.as_ref().is_some_and(|x| retired.contains(&x.access_token)) {
                tracing::debug!("ignoring replay of a replaced session");
                return false;
            }
            let unchanged = match (&s.session, &session) {
                (Some(held), Some(new)) => held.same_as(new),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                let was_loading = s.loading;
                s.loading = false;
                return was_loading;
            }

            if let Some(held) = &s.session {
                if retired.len() == RETIRED_TOKEN_LIMIT {
                    retired.pop_front();
                }
                retired.push_back(held.access_token.clone());
            }
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            s.user = session.as_ref().map(|x| x.user.clone());
            s.profile = None;
            s.roles.clear();
            s.profile_pending = session.is_some();
            s.loading = false;
            if let Some(user) = &s.user {
                fetch = Some((generation, user.id));
            }
            s.session = session;
            true
        });

        if let Some((generation, user_id)) = fetch {
            let manager = self.clone();
            tokio::spawn(async move { manager.fetch_profile_and_roles(generation, user_id).await });
        }
    }

    async fn fetch_profile_and_roles(&self, generation: u64, user_id: Uuid) {
        let service = &self.inner.service;
        let (profile, roles) = tokio::join!(service.get_profile(user_id), service.get_roles(user_id));

        let profile = profile
            .map_err(|e| tracing::error!(error = %e, %user_id, "profile fetch failed"))
            .ok();
        let roles = roles
            .map_err(|e| tracing::error!(error = %e, %user_id, "roles fetch failed"))
            .ok();

        let applied = self.inner.state.send_if_modified(|s| {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if self.inner.profile_confirmed.load(Ordering::SeqCst) == generation {
                tracing::debug!(%user_id, "keeping profile written by update during fetch");
            } else {
                s.profile = profile;
            }
            s.roles = roles.unwrap_or_default().into_iter().collect();
            s.profile_pending = false;
            true
        });
        if !applied {
            tracing::debug!(%user_id, generation, "discarding profile/roles for a superseded session");
        }
    }

    async fn resync(&self) {
        match self.inner.service.current_session().await {
            Ok(session) => self.apply_session(session, false),
            Err(e) => tracing::warn!(error = %e, "session resync failed"),
        }
    }
}

/// Session stream listener. Holds a weak handle so a dropped manager ends it.
async fn listen(manager: Weak<Inner>, mut events: broadcast::Receiver<SessionChange>) {
    loop {
        let change = events.recv().await;
        let Some(inner) = manager.upgrade() else {
            break;
        };
        let manager = SessionManager { inner };
        match change {
            Ok(change) => {
                tracing::debug!(event = ?change.event, has_session = change.session.is_some(), "session change");
                manager.apply_session(change.session, false);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session events lagged; resyncing");
                tokio::spawn(async move { manager.resync().await });
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("session event stream closed");
                break;
            }
        }
    }
}

// =============================================================================
// BUSY GUARD
// =============================================================================

/// Raises `busy` for its lifetime. Nested guards keep it raised until the last drops.
struct BusyGuard<'a> {
    inner: &'a Inner,
}

impl<'a> BusyGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.state.send_modify(|s| {
            inner.in_flight.fetch_add(1, Ordering::SeqCst);
            s.busy = true;
        });
        Self { inner }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let inner = self.inner;
        inner.state.send_modify(|s| {
            let before = inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            s.busy = before > 1;
        });
    }
}
