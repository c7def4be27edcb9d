//! User-facing notifications (toasts) emitted by session operations.
//!
//! DESIGN
//! ======
//! Toasts are a side effect, not a return value: the manager hands them to a
//! `Notifier` and still returns a `Result` to its caller. The catalogue below
//! holds the fixed title/description copy; failure toasts carry the service
//! message as description.

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastVariant {
    Default,
    Destructive,
}

/// A titled user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
}

impl Toast {
    fn success(title: &str, description: &str) -> Self {
        Self { title: title.to_owned(), description: description.to_owned(), variant: ToastVariant::Default }
    }

    fn failure(title: &str, description: impl Into<String>) -> Self {
        Self { title: title.to_owned(), description: description.into(), variant: ToastVariant::Destructive }
    }

    // =========================================================================
    // CATALOGUE
    // =========================================================================

    #[must_use]
    pub fn sign_up_succeeded() -> Self {
        Self::success("Inscription réussie", "Vérifiez votre email pour confirmer votre compte.")
    }

    #[must_use]
    pub fn sign_up_failed(message: impl Into<String>) -> Self {
        Self::failure("Erreur d'inscription", message)
    }

    #[must_use]
    pub fn sign_in_succeeded() -> Self {
        Self::success("Connexion réussie", "Bienvenue sur dalil.dz")
    }

    #[must_use]
    pub fn sign_in_failed(message: impl Into<String>) -> Self {
        Self::failure("Erreur de connexion", message)
    }

    #[must_use]
    pub fn sign_out_succeeded() -> Self {
        Self::success("Déconnexion réussie", "À bientôt sur dalil.dz")
    }

    #[must_use]
    pub fn sign_out_failed(message: impl Into<String>) -> Self {
        Self::failure("Erreur de déconnexion", message)
    }

    #[must_use]
    pub fn reset_email_sent() -> Self {
        Self::success("Email envoyé", "Vérifiez votre boîte mail pour réinitialiser votre mot de passe.")
    }

    #[must_use]
    pub fn reset_failed(message: impl Into<String>) -> Self {
        Self::failure("Erreur", message)
    }

    #[must_use]
    pub fn profile_updated() -> Self {
        Self::success("Profil mis à jour", "Vos informations ont été sauvegardées.")
    }

    #[must_use]
    pub fn profile_update_failed(message: impl Into<String>) -> Self {
        Self::failure("Erreur de mise à jour", message)
    }
}

// =============================================================================
// NOTIFIERS
// =============================================================================

/// Sink for toasts. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Logs toasts through `tracing`; destructive ones at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, toast: Toast) {
        match toast.variant {
            ToastVariant::Default => tracing::info!(title = %toast.title, description = %toast.description, "toast"),
            ToastVariant::Destructive => {
                tracing::warn!(title = %toast.title, description = %toast.description, "toast");
            }
        }
    }
}

/// Keeps every toast in memory, for tests and for UIs that poll.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Toast> {
        let mut toasts = self.toasts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *toasts)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, toast: Toast) {
        self.toasts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(toast);
    }
}
