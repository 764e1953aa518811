//! Error types for the crate.
//!
//! Most plumbing uses `anyhow` through the `Result` alias. Failures that cross one of the external
//! boundaries (the document collection or the identity provider) are typed so that callers can
//! route them: permission denials go to the error channel, auth failures become notifications.

use std::convert::Infallible;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by the persistence boundary.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The access policy rejected the read or write.
    #[error("Missing or insufficient permissions for '{path}'")]
    PermissionDenied { path: String },

    /// The backend could not be reached.
    #[error("The service is currently unavailable: {0}")]
    Unavailable(String),

    /// The addressed document does not exist.
    #[error("No document found at '{path}'")]
    NotFound { path: String },

    /// A stored document could not be decoded.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl RemoteError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RemoteError::PermissionDenied { .. })
    }
}

/// Error codes produced by the identity provider, spelled the way the provider spells them, e.g.
/// `auth/invalid-credential`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AuthErrorCode {
    InvalidCredential,
    EmailAlreadyInUse,
    WeakPassword,
    InvalidEmail,
    Other(String),
}

const INVALID_CREDENTIAL: &str = "auth/invalid-credential";
const EMAIL_ALREADY_IN_USE: &str = "auth/email-already-in-use";
const WEAK_PASSWORD: &str = "auth/weak-password";
const INVALID_EMAIL: &str = "auth/invalid-email";

impl AuthErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            AuthErrorCode::InvalidCredential => INVALID_CREDENTIAL,
            AuthErrorCode::EmailAlreadyInUse => EMAIL_ALREADY_IN_USE,
            AuthErrorCode::WeakPassword => WEAK_PASSWORD,
            AuthErrorCode::InvalidEmail => INVALID_EMAIL,
            AuthErrorCode::Other(code) => code,
        }
    }
}

impl Display for AuthErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthErrorCode {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            INVALID_CREDENTIAL => AuthErrorCode::InvalidCredential,
            EMAIL_ALREADY_IN_USE => AuthErrorCode::EmailAlreadyInUse,
            WEAK_PASSWORD => AuthErrorCode::WeakPassword,
            INVALID_EMAIL => AuthErrorCode::InvalidEmail,
            other => AuthErrorCode::Other(other.to_string()),
        })
    }
}

/// A failure reported by the identity boundary.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct AuthError {
    code: AuthErrorCode,
    message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &AuthErrorCode {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_code_spelling() {
        assert_eq!(
            AuthErrorCode::InvalidCredential.to_string(),
            "auth/invalid-credential"
        );
        assert_eq!(
            AuthErrorCode::from_str("auth/email-already-in-use").unwrap(),
            AuthErrorCode::EmailAlreadyInUse
        );
        assert_eq!(
            AuthErrorCode::from_str("auth/too-many-requests").unwrap(),
            AuthErrorCode::Other("auth/too-many-requests".to_string())
        );
    }

    #[test]
    fn test_auth_error_display() {
        let e = AuthError::new(AuthErrorCode::WeakPassword, "Password is too short");
        assert_eq!(e.to_string(), "Password is too short (auth/weak-password)");
    }

    #[test]
    fn test_remote_error_permission_denied() {
        let e = RemoteError::PermissionDenied {
            path: "users/u1/transactions".to_string(),
        };
        assert!(e.is_permission_denied());
        assert!(!RemoteError::Unavailable("offline".into()).is_permission_denied());
    }
}
