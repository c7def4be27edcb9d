//! Session management for the dalil.dz legal-information platform.
//!
//! ARCHITECTURE
//! ============
//! `SessionManager` tracks the signed-in session, the user's profile and
//! role set, and mediates every authentication operation against an
//! `IdentityService` (the hosted auth/database backend). `RouteGuard` turns
//! the manager's state into a render decision; `validation` holds the form
//! rules checked before an operation is invoked.

pub mod config;
pub mod error;
pub mod guard;
pub mod manager;
pub mod notify;
pub mod service;
pub mod types;
pub mod validation;

pub use config::ServiceConfig;
pub use error::{AuthError, ServiceError};
pub use guard::{GuardDecision, RouteGuard};
pub use manager::{AuthSnapshot, Redirects, SessionManager};
pub use notify::{Notifier, Toast, ToastVariant};
pub use service::{IdentityService, SupabaseClient};
pub use types::{Profile, ProfileUpdate, Role, Session, SignUpMetadata, User};
