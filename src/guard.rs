//! Route guard: decides what a protected view shows for the current
//! session state.
//!
//! The guard holds no session state of its own; `decide` is a pure function
//! of an `AuthSnapshot`. When a role is required, the decision waits for the
//! deferred role fetch instead of reporting a transient "unauthorized".

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;

use crate::manager::{AuthSnapshot, SessionManager};
use crate::types::Role;

/// Outcome of a guard check. Only `Allowed` renders the protected content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Loading,
    Unauthenticated,
    Unauthorized,
    Allowed,
}

impl GuardDecision {
    /// Heading shown in place of the protected content.
    #[must_use]
    pub fn title(self) -> Option<&'static str> {
        match self {
            Self::Loading => Some("Chargement..."),
            Self::Unauthenticated => Some("Connexion"),
            Self::Unauthorized => Some("Accès non autorisé"),
            Self::Allowed => None,
        }
    }

    #[must_use]
    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::Loading => None,
            Self::Unauthenticated => Some("Connectez-vous à votre compte"),
            Self::Unauthorized => {
                Some("Vous n'avez pas les permissions nécessaires pour accéder à cette page.")
            }
            Self::Allowed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteGuard {
    pub require_role: Option<Role>,
}

impl RouteGuard {
    /// Guard that only requires a signed-in user.
    #[must_use]
    pub fn authenticated() -> Self {
        Self { require_role: None }
    }

    #[must_use]
    pub fn requiring(role: Role) -> Self {
        Self { require_role: Some(role) }
    }

    #[must_use]
    pub fn decide(&self, state: &AuthSnapshot) -> GuardDecision {
        if state.loading {
            return GuardDecision::Loading;
        }
        if state.user.is_none() {
            return GuardDecision::Unauthenticated;
        }
        match self.require_role {
            None => GuardDecision::Allowed,
            Some(_) if state.profile_pending => GuardDecision::Loading,
            Some(role) if state.has_role(role) => GuardDecision::Allowed,
            Some(_) => GuardDecision::Unauthorized,
        }
    }

    /// Wait for the first decision that is not `Loading`.
    pub async fn resolve(&self, manager: &SessionManager) -> GuardDecision {
        let mut rx = manager.subscribe();
        match rx.wait_for(|s| self.decide(s) != GuardDecision::Loading).await {
            Ok(state) => self.decide(&state),
            Err(_) => self.decide(&manager.snapshot()),
        }
    }
}
