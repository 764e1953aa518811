//! The sign-in and sign-up form. Authentication failures are never published on the error channel;
//! they are turned into a short notification for the user.

use crate::api::Identity;
use crate::error::{AuthError, AuthErrorCode};
use crate::model::User;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{info, warn};

const SIGN_IN_OK_TITLE: &str = "Inicio de sesión exitoso";
const SIGN_IN_OK_DESCRIPTION: &str = "Bienvenido de nuevo.";
const SIGN_UP_OK_TITLE: &str = "Registro exitoso";
const SIGN_UP_OK_DESCRIPTION: &str = "Tu cuenta ha sido creada.";
const SIGN_IN_FAILED_TITLE: &str = "Error al iniciar sesión";
const SIGN_UP_FAILED_TITLE: &str = "Error al registrarse";
const INVALID_CREDENTIAL: &str = "Credenciales incorrectas.";
const EMAIL_IN_USE: &str = "El correo electrónico ya está en uso.";
const UNEXPECTED: &str = "Ocurrió un error inesperado.";

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Default,
    Destructive,
}

serde_plain::derive_display_from_serialize!(Variant);

/// A transient message shown to the user.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    variant: Variant,
    title: String,
    description: String,
}

impl Notification {
    pub fn new(variant: Variant, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            variant,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_error(&self) -> bool {
        self.variant == Variant::Destructive
    }
}

impl Display for Notification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.description)
    }
}

/// What the user gets back from submitting the form.
#[derive(Debug, Clone)]
pub struct Submission {
    pub user: Option<User>,
    pub notification: Notification,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Action {
    SignIn,
    SignUp,
}

/// Submits credentials to the identity provider.
#[derive(Clone)]
pub struct AuthForm {
    identity: Arc<dyn Identity>,
}

impl AuthForm {
    pub fn new(identity: Arc<dyn Identity>) -> Self {
        Self { identity }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Submission {
        let result = self.identity.sign_in(email, password).await;
        submission(Action::SignIn, result)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Submission {
        let result = self.identity.sign_up(email, password).await;
        submission(Action::SignUp, result)
    }
}

fn submission(action: Action, result: Result<User, AuthError>) -> Submission {
    match result {
        Ok(user) => {
            info!("{action:?} succeeded for {}", user.email());
            let notification = match action {
                Action::SignIn => Notification::new(
                    Variant::Default,
                    SIGN_IN_OK_TITLE,
                    SIGN_IN_OK_DESCRIPTION,
                ),
                Action::SignUp => Notification::new(
                    Variant::Default,
                    SIGN_UP_OK_TITLE,
                    SIGN_UP_OK_DESCRIPTION,
                ),
            };
            Submission {
                user: Some(user),
                notification,
            }
        }
        Err(e) => {
            warn!("{action:?} failed: {e}");
            Submission {
                user: None,
                notification: failure(action, e.code()),
            }
        }
    }
}

/// Maps a provider error code to the message shown to the user.
pub fn failure_message(code: &AuthErrorCode, signing_up: bool) -> &'static str {
    match (code, signing_up) {
        (AuthErrorCode::InvalidCredential, false) => INVALID_CREDENTIAL,
        (AuthErrorCode::EmailAlreadyInUse, true) => EMAIL_IN_USE,
        _ => UNEXPECTED,
    }
}

fn failure(action: Action, code: &AuthErrorCode) -> Notification {
    let title = match action {
        Action::SignIn => SIGN_IN_FAILED_TITLE,
        Action::SignUp => SIGN_UP_FAILED_TITLE,
    };
    Notification::new(
        Variant::Destructive,
        title,
        failure_message(code, action == Action::SignUp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LocalBackend;

    fn form() -> (AuthForm, LocalBackend) {
        let backend = LocalBackend::new();
        (AuthForm::new(Arc::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let (form, backend) = form();
        let signed_up = form.sign_up("a@b.com", "secret1").await;
        assert_eq!(
            signed_up.notification,
            Notification::new(Variant::Default, "Registro exitoso", "Tu cuenta ha sido creada.")
        );
        let user = signed_up.user.unwrap();

        backend.sign_out().await.unwrap();
        let signed_in = form.sign_in("a@b.com", "secret1").await;
        assert_eq!(signed_in.user, Some(user));
        assert_eq!(signed_in.notification.title(), "Inicio de sesión exitoso");
        assert_eq!(signed_in.notification.description(), "Bienvenido de nuevo.");
        assert!(!signed_in.notification.is_error());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (form, _) = form();
        form.sign_up("a@b.com", "secret1").await;
        let result = form.sign_in("a@b.com", "wrong!").await;
        assert!(result.user.is_none());
        assert!(result.notification.is_error());
        assert_eq!(result.notification.title(), "Error al iniciar sesión");
        assert_eq!(result.notification.description(), "Credenciales incorrectas.");
    }

    #[tokio::test]
    async fn test_email_in_use() {
        let (form, _) = form();
        form.sign_up("a@b.com", "secret1").await;
        let result = form.sign_up("a@b.com", "secret2").await;
        assert_eq!(result.notification.title(), "Error al registrarse");
        assert_eq!(
            result.notification.description(),
            "El correo electrónico ya está en uso."
        );
    }

    #[tokio::test]
    async fn test_unexpected_errors() {
        let (form, backend) = form();
        let weak = form.sign_up("a@b.com", "123").await;
        assert_eq!(weak.notification.description(), "Ocurrió un error inesperado.");

        backend.set_online(false);
        let offline = form.sign_in("a@b.com", "secret1").await;
        assert_eq!(offline.notification.description(), "Ocurrió un error inesperado.");
    }

    #[test]
    fn test_failure_message() {
        assert_eq!(
            failure_message(&AuthErrorCode::InvalidCredential, true),
            UNEXPECTED
        );
        assert_eq!(
            failure_message(&AuthErrorCode::EmailAlreadyInUse, false),
            UNEXPECTED
        );
        assert_eq!(
            failure_message(&AuthErrorCode::Other("auth/too-many-requests".into()), false),
            UNEXPECTED
        );
    }
}
