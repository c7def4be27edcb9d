//! In-memory `IdentityService` used by the manager tests.
//!
//! Behaves like the hosted service for the calls the manager makes: accounts
//! with passwords, profile rows created at sign-up, role rows, and a
//! broadcast of every session transition. Failures can be injected per call
//! and every call is counted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use super::{IdentityService, SESSION_EVENT_CAPACITY};
use crate::error::ServiceError;
use crate::types::{AuthEvent, Profile, ProfileUpdate, Role, Session, SessionChange, SignUpMetadata, User};

/// Service calls that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    CurrentSession,
    SignUp,
    SignIn,
    SignOut,
    ResetPassword,
    GetProfile,
    GetRoles,
    UpdateProfile,
}

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct Store {
    accounts: HashMap<String, Account>,
    profiles: HashMap<Uuid, Profile>,
    roles: HashMap<Uuid, Vec<Role>>,
    session: Option<Session>,
    failures: HashMap<Call, ServiceError>,
    calls: HashMap<Call, usize>,
    reset_requests: Vec<(String, String)>,
    require_confirmation: bool,
    issued: u64,
    profile_gate: Option<Arc<Notify>>,
}

pub struct MemoryIdentityService {
    store: Mutex<Store>,
    events: broadcast::Sender<SessionChange>,
}

impl Default for MemoryIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityService {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self { store: Mutex::new(Store::default()), events }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed an account with its profile row and role assignments.
    pub fn add_user(&self, email: &str, password: &str, roles: &[Role]) -> Uuid {
        let id = Uuid::new_v4();
        let mut store = self.lock();
        store.accounts.insert(
            email.to_owned(),
            Account { user: User { id, email: Some(email.to_owned()) }, password: password.to_owned() },
        );
        store.profiles.insert(id, Profile { id, email: Some(email.to_owned()), ..Profile::default() });
        store.roles.insert(id, roles.to_vec());
        id
    }

    pub fn set_roles(&self, user_id: Uuid, roles: &[Role]) {
        self.lock().roles.insert(user_id, roles.to_vec());
    }

    /// When set, sign-up creates the account but issues no session.
    pub fn require_confirmation(&self, on: bool) {
        self.lock().require_confirmation = on;
    }

    /// Make every later `call` fail with `error` until cleared.
    pub fn fail(&self, call: Call, error: ServiceError) {
        self.lock().failures.insert(call, error);
    }

    pub fn clear_failure(&self, call: Call) {
        self.lock().failures.remove(&call);
    }

    /// Make every later `get_profile` read its row, then wait for a permit
    /// on the returned gate before answering.
    pub fn hold_profile_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().profile_gate = Some(gate.clone());
        gate
    }

    /// Pretend a session was persisted by an earlier process.
    pub fn persist_session_for(&self, email: &str) -> Option<Session> {
        let mut store = self.lock();
        let user = store.accounts.get(email)?.user.clone();
        let session = issue(&mut store, user);
        store.session = Some(session.clone());
        Some(session)
    }

    /// Broadcast a transition as if the service emitted it on its own.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.events.send(SessionChange { event, session });
    }

    #[must_use]
    pub fn calls(&self, call: Call) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn reset_requests(&self) -> Vec<(String, String)> {
        self.lock().reset_requests.clone()
    }

    #[must_use]
    pub fn stored_profile(&self, user_id: Uuid) -> Option<Profile> {
        self.lock().profiles.get(&user_id).cloned()
    }

    /// Count the call and return its injected failure, if any.
    fn enter(&self, call: Call) -> Result<std::sync::MutexGuard<'_, Store>, ServiceError> {
        let mut store = self.lock();
        *store.calls.entry(call).or_default() += 1;
        match store.failures.get(&call) {
            Some(e) => Err(e.clone()),
            None => Ok(store),
        }
    }

    fn announce(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.events.send(SessionChange { event, session });
    }
}

fn issue(store: &mut Store, user: User) -> Session {
    store.issued += 1;
    Session {
        access_token: format!("token-{}", store.issued),
        refresh_token: Some(format!("refresh-{}", store.issued)),
        token_type: "bearer".to_owned(),
        expires_at: None,
        user,
    }
}

fn invalid_credentials() -> ServiceError {
    ServiceError::Api { status: 400, message: "Invalid login credentials".to_owned() }
}

#[async_trait::async_trait]
impl IdentityService for MemoryIdentityService {
    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }

    async fn current_session(&self) -> Result<Option<Session>, ServiceError> {
        let store = self.enter(Call::CurrentSession)?;
        Ok(store.session.clone())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
        _redirect_to: &str,
    ) -> Result<Option<Session>, ServiceError> {
        let session = {
            let mut store = self.enter(Call::SignUp)?;
            if store.accounts.contains_key(email) {
                return Err(ServiceError::Api { status: 422, message: "User already registered".to_owned() });
            }
            let id = Uuid::new_v4();
            let user = User { id, email: Some(email.to_owned()) };
            store.accounts.insert(email.to_owned(), Account { user: user.clone(), password: password.to_owned() });
            store.profiles.insert(
                id,
                Profile {
                    id,
                    email: Some(email.to_owned()),
                    first_name: Some(metadata.first_name.clone()),
                    last_name: Some(metadata.last_name.clone()),
                    role: metadata.role.map(|r| r.as_str().to_owned()),
                    ..Profile::default()
                },
            );
            store.roles.insert(id, metadata.role.into_iter().collect());
            if store.require_confirmation {
                return Ok(None);
            }
            let session = issue(&mut store, user);
            store.session = Some(session.clone());
            session
        };
        self.announce(AuthEvent::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        let session = {
            let mut store = self.enter(Call::SignIn)?;
            let user = match store.accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(invalid_credentials()),
            };
            let session = issue(&mut store, user);
            store.session = Some(session.clone());
            session
        };
        self.announce(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        {
            let mut store = self.enter(Call::SignOut)?;
            if store.session.take().is_none() {
                return Err(ServiceError::SessionMissing);
            }
        }
        self.announce(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), ServiceError> {
        let mut store = self.enter(Call::ResetPassword)?;
        store.reset_requests.push((email.to_owned(), redirect_to.to_owned()));
        Ok(())
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Profile, ServiceError> {
        let (row, gate) = {
            let store = self.enter(Call::GetProfile)?;
            (store.profiles.get(&user_id).cloned(), store.profile_gate.clone())
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        row.ok_or_else(|| ServiceError::Api {
            status: 406,
            message: "JSON object requested, multiple (or no) rows returned".to_owned(),
        })
    }

    async fn get_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let store = self.enter(Call::GetRoles)?;
        Ok(store.roles.get(&user_id).cloned().unwrap_or_default())
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> Result<Profile, ServiceError> {
        let mut store = self.enter(Call::UpdateProfile)?;
        let profile = store.profiles.get_mut(&user_id).ok_or_else(|| ServiceError::Api {
            status: 406,
            message: "JSON object requested, multiple (or no) rows returned".to_owned(),
        })?;
        profile.apply(update);
        Ok(profile.clone())
    }
}
