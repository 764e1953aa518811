//! The external collaborators: the document collection, the identity provider and the advisor
//! model. Each is a trait so that the store and the session binder never know which
//! implementation they are talking to.

mod http_advisor;
mod local;
mod scripted_advisor;

use crate::error::{AuthError, RemoteError};
use crate::model::{Message, User};
use crate::{Config, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::debug;

pub use http_advisor::HttpAdvisor;
pub use local::LocalBackend;
pub use scripted_advisor::ScriptedAdvisor;

pub const USERS: &str = "users";
pub const TRANSACTIONS: &str = "transactions";
pub const DATE_FIELD: &str = "date";

const TEST_MODE_ENV: &str = "LIFTUP_IN_TEST_MODE";

/// The path of a user's transaction collection, `users/{uid}/transactions`.
pub fn transactions_path(uid: &str) -> String {
    format!("{USERS}/{uid}/{TRANSACTIONS}")
}

/// The path of one transaction document, `users/{uid}/transactions/{id}`.
pub fn transaction_path(uid: &str, id: &str) -> String {
    format!("{}/{id}", transactions_path(uid))
}

/// A document as returned by a live query: its id and its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    #[default]
    Descending,
}

/// A query over a single collection with an optional ordering on one field.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Query {
    path: String,
    order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            order_by: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn ordering(&self) -> Option<(&str, Direction)> {
        self.order_by.as_ref().map(|(f, d)| (f.as_str(), *d))
    }
}

/// Either the full current result set of a live query or the reason the query failed. A failed
/// query delivers no further snapshots.
pub type Snapshot = std::result::Result<Vec<Document>, RemoteError>;

/// A path-addressed document collection that supports live queries.
#[async_trait::async_trait]
pub trait Collection: Send + Sync {
    /// Creates a document with a generated id inside `collection_path` and returns the id.
    async fn add(
        &self,
        collection_path: &str,
        data: serde_json::Value,
    ) -> std::result::Result<String, RemoteError>;

    /// Overwrites the given fields of the document at `document_path`.
    async fn update(
        &self,
        document_path: &str,
        data: serde_json::Value,
    ) -> std::result::Result<(), RemoteError>;

    /// Removes the document at `document_path`.
    async fn delete(&self, document_path: &str) -> std::result::Result<(), RemoteError>;

    /// Opens a live query. The first snapshot arrives as soon as the query is served and another
    /// follows every change to the result set. Dropping the receiver detaches the listener.
    fn listen(&self, query: Query) -> mpsc::UnboundedReceiver<Snapshot>;
}

/// The managed identity provider.
#[async_trait::async_trait]
pub trait Identity: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> std::result::Result<User, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> std::result::Result<User, AuthError>;

    async fn sign_out(&self) -> std::result::Result<(), AuthError>;

    /// Observes the authentication state. The receiver holds the current state and is notified
    /// whenever it changes.
    fn auth_state(&self) -> watch::Receiver<Option<User>>;
}

/// A hosted language model.
#[async_trait::async_trait]
pub trait Advisor: Send + Sync {
    /// Generates a reply to `prompt` given the earlier turns of the conversation.
    async fn generate(&self, prompt: &str, history: &[Message]) -> Result<String>;
}

/// Whether we are talking to the hosted model or running fully offline.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Live,
    Test,
}

impl Mode {
    /// `Mode::Test` when `LIFTUP_IN_TEST_MODE` is set and non-empty, otherwise `Mode::Live`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Live,
        }
    }
}

/// Creates the advisor for `mode`. In live mode the API key is read from the environment variable
/// named in the config.
pub fn advisor(config: &Config, mode: Mode) -> Result<Box<dyn Advisor>> {
    match mode {
        Mode::Live => {
            let advisor = HttpAdvisor::from_config(config.advisor())?;
            debug!("Using the hosted advisor model '{}'", config.advisor().model());
            Ok(Box::new(advisor))
        }
        Mode::Test => {
            debug!("Using the scripted advisor");
            Ok(Box::new(ScriptedAdvisor::default()))
        }
    }
}
