//! Form schemas checked before a session operation is invoked.
//!
//! Every rule of a form is evaluated so the caller can show all field
//! messages at once. Messages are the French copy shown under each field.

#[cfg(test)]
#[path = "validation_test.rs"]
mod tests;

use crate::types::{ProfileUpdate, Role, SignUpMetadata};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_NAME_LEN: usize = 2;

pub const MSG_INVALID_EMAIL: &str = "Email invalide";
pub const MSG_PASSWORD_TOO_SHORT: &str = "Le mot de passe doit contenir au moins 6 caractères";
pub const MSG_PASSWORD_MISMATCH: &str = "Les mots de passe ne correspondent pas";
pub const MSG_FIRST_NAME_TOO_SHORT: &str = "Le prénom doit contenir au moins 2 caractères";
pub const MSG_LAST_NAME_TOO_SHORT: &str = "Le nom doit contenir au moins 2 caractères";

// =============================================================================
// ERRORS
// =============================================================================

/// One failed rule, attached to the field it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// All failed rules of one form submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_field_errors(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    /// Message for `field`, if that field failed.
    #[must_use]
    pub fn message_for(&self, field: &str) -> Option<&'static str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Collector(Vec<FieldError>);

impl Collector {
    fn check(&mut self, ok: bool, field: &'static str, message: &'static str) {
        if !ok {
            self.0.push(FieldError { field, message });
        }
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(ValidationErrors(self.0)) }
    }
}

// =============================================================================
// RULES
// =============================================================================

/// Structural email check: one `@`, non-empty local part, dotted domain, no spaces.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels = domain.split('.').collect::<Vec<_>>();
    labels.len() >= 2
        && labels.iter().all(|l| !l.is_empty() && !l.starts_with('-') && !l.ends_with('-'))
        && labels.last().is_some_and(|tld| tld.len() >= 2)
}

fn long_enough(value: &str, min: usize) -> bool {
    value.chars().count() >= min
}

// =============================================================================
// FORMS
// =============================================================================

#[derive(Debug, Clone)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    /// # Errors
    ///
    /// Returns every failed field rule.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut c = Collector::default();
        c.check(is_valid_email(&self.email), "email", MSG_INVALID_EMAIL);
        c.check(long_enough(&self.password, MIN_PASSWORD_LEN), "password", MSG_PASSWORD_TOO_SHORT);
        c.finish()
    }
}

#[derive(Debug, Clone)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<Role>,
}

impl RegisterForm {
    /// # Errors
    ///
    /// Returns every failed field rule.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut c = Collector::default();
        c.check(is_valid_email(&self.email), "email", MSG_INVALID_EMAIL);
        c.check(long_enough(&self.password, MIN_PASSWORD_LEN), "password", MSG_PASSWORD_TOO_SHORT);
        c.check(long_enough(&self.confirm_password, MIN_PASSWORD_LEN), "confirm_password", MSG_PASSWORD_TOO_SHORT);
        c.check(long_enough(&self.first_name, MIN_NAME_LEN), "first_name", MSG_FIRST_NAME_TOO_SHORT);
        c.check(long_enough(&self.last_name, MIN_NAME_LEN), "last_name", MSG_LAST_NAME_TOO_SHORT);
        // Mismatch is only checked once every length rule passes.
        if c.0.is_empty() {
            c.check(self.password == self.confirm_password, "confirm_password", MSG_PASSWORD_MISMATCH);
        }
        c.finish()
    }

    /// Metadata stored with the new identity; role defaults to citoyen.
    #[must_use]
    pub fn metadata(&self) -> SignUpMetadata {
        SignUpMetadata {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: Some(self.role.unwrap_or(Role::Citoyen)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResetForm {
    pub email: String,
}

impl ResetForm {
    /// # Errors
    ///
    /// Returns every failed field rule.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut c = Collector::default();
        c.check(is_valid_email(&self.email), "email", MSG_INVALID_EMAIL);
        c.finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProfileForm {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl ProfileForm {
    /// # Errors
    ///
    /// Returns every failed field rule.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut c = Collector::default();
        c.check(long_enough(&self.first_name, MIN_NAME_LEN), "first_name", MSG_FIRST_NAME_TOO_SHORT);
        c.check(long_enough(&self.last_name, MIN_NAME_LEN), "last_name", MSG_LAST_NAME_TOO_SHORT);
        c.finish()
    }

    #[must_use]
    pub fn into_update(self) -> ProfileUpdate {
        ProfileUpdate {
            first_name: Some(self.first_name),
            last_name: Some(self.last_name),
            phone: self.phone,
            ..ProfileUpdate::default()
        }
    }
}
