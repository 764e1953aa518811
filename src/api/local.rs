//! Implements the `Identity` and `Collection` traits in memory.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without the managed identity provider or document database. It enforces
//! the same access rule the hosted database is configured with: a user may only read and write
//! documents under `users/{their uid}/`.

use crate::api::{
    transactions_path, Collection, Direction, Document, Identity, Query, Snapshot, USERS,
};
use crate::error::{AuthError, AuthErrorCode, RemoteError};
use crate::model::{TransactionDocument, User};
use crate::Result;
use anyhow::Context;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;
const NETWORK_REQUEST_FAILED: &str = "auth/network-request-failed";

/// An in-memory identity provider and document collection. Clones share state.
#[derive(Clone)]
pub struct LocalBackend {
    state: Arc<Mutex<State>>,
    auth: Arc<watch::Sender<Option<User>>>,
}

/// Accounts only live as long as the process; nothing here is ever written to disk.
struct Account {
    user: User,
    password: String,
}

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct State {
    online: bool,
    accounts: BTreeMap<String, Account>,
    /// Collection path -> document id -> document body.
    collections: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    listeners: Vec<Listener>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        let (auth, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(State {
                online: true,
                accounts: BTreeMap::new(),
                collections: BTreeMap::new(),
                listeners: Vec::new(),
            })),
            auth: Arc::new(auth),
        }
    }

    /// Simulates losing or regaining the connection. While offline every call fails with
    /// `RemoteError::Unavailable` and open live queries receive that error.
    pub fn set_online(&self, online: bool) {
        let mut state = self.lock();
        state.online = online;
        if !online {
            let error = RemoteError::Unavailable("The client is offline".to_string());
            for listener in state.listeners.drain(..) {
                let _ = listener.tx.send(Err(error.clone()));
            }
        }
    }

    /// Writes documents into `users/{uid}/transactions` without going through the access rule,
    /// the way an administrator would import data.
    pub fn seed(&self, uid: &str, documents: &[TransactionDocument]) -> Result<Vec<String>> {
        let path = transactions_path(uid);
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            let id = new_id();
            let body = doc.to_value()?;
            state
                .collections
                .entry(path.clone())
                .or_default()
                .insert(id.clone(), body);
            ids.push(id);
        }
        state.notify(&path);
        Ok(ids)
    }

    /// Seeds `users/{uid}/transactions` with the bundled demo data.
    pub fn seed_demo(&self, uid: &str) -> Result<Vec<String>> {
        let documents = load_csv(DEMO_TRANSACTIONS)?;
        self.seed(uid, &documents)
    }

    /// The number of live queries currently attached.
    pub fn listener_count(&self) -> usize {
        let mut state = self.lock();
        state.listeners.retain(|l| !l.tx.is_closed());
        state.listeners.len()
    }

    /// Reads a document body directly, bypassing the access rule.
    pub fn get(&self, document_path: &str) -> Option<serde_json::Value> {
        let (collection, id) = document_path.rsplit_once('/')?;
        self.lock().collections.get(collection)?.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_uid(&self) -> Option<String> {
        self.auth.borrow().as_ref().map(|u| u.uid().to_string())
    }

    /// Checks that the backend is reachable and that the signed-in user owns `path`.
    fn authorize(&self, state: &State, path: &str) -> std::result::Result<(), RemoteError> {
        if !state.online {
            return Err(RemoteError::Unavailable("The client is offline".to_string()));
        }
        if is_owner(self.current_uid().as_deref(), path) {
            Ok(())
        } else {
            Err(RemoteError::PermissionDenied {
                path: path.to_string(),
            })
        }
    }

    /// Publishes a new auth state and fails every live query the new user may not read.
    fn set_auth(&self, user: Option<User>) {
        let uid = user.as_ref().map(|u| u.uid().to_string());
        {
            let mut state = self.lock();
            state.listeners.retain(|l| {
                if is_owner(uid.as_deref(), l.query.path()) {
                    return true;
                }
                trace!("Revoking live query on {}", l.query.path());
                let _ = l.tx.send(Err(RemoteError::PermissionDenied {
                    path: l.query.path().to_string(),
                }));
                false
            });
        }
        self.auth.send_replace(user);
    }
}

impl State {
    /// Sends a fresh snapshot to every listener of `collection_path`, dropping closed listeners.
    fn notify(&mut self, collection_path: &str) {
        let collections = &self.collections;
        self.listeners.retain(|l| {
            if l.query.path() != collection_path {
                return !l.tx.is_closed();
            }
            l.tx.send(Ok(run_query(collections, &l.query))).is_ok()
        });
    }
}

#[async_trait::async_trait]
impl Collection for LocalBackend {
    async fn add(
        &self,
        collection_path: &str,
        data: serde_json::Value,
    ) -> std::result::Result<String, RemoteError> {
        let mut state = self.lock();
        self.authorize(&state, collection_path)?;
        let id = new_id();
        state
            .collections
            .entry(collection_path.to_string())
            .or_default()
            .insert(id.clone(), data);
        debug!("Created {collection_path}/{id}");
        state.notify(collection_path);
        Ok(id)
    }

    async fn update(
        &self,
        document_path: &str,
        data: serde_json::Value,
    ) -> std::result::Result<(), RemoteError> {
        let mut state = self.lock();
        self.authorize(&state, document_path)?;
        let (collection_path, id) = split_document_path(document_path)?;
        let existing = state
            .collections
            .get_mut(collection_path)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| RemoteError::NotFound {
                path: document_path.to_string(),
            })?;
        merge_fields(existing, data)?;
        debug!("Updated {document_path}");
        state.notify(collection_path);
        Ok(())
    }

    async fn delete(&self, document_path: &str) -> std::result::Result<(), RemoteError> {
        let mut state = self.lock();
        self.authorize(&state, document_path)?;
        let (collection_path, id) = split_document_path(document_path)?;
        let removed = state
            .collections
            .get_mut(collection_path)
            .and_then(|docs| docs.remove(id));
        if removed.is_some() {
            debug!("Deleted {document_path}");
            state.notify(collection_path);
        }
        Ok(())
    }

    fn listen(&self, query: Query) -> mpsc::UnboundedReceiver<Snapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if let Err(e) = self.authorize(&state, query.path()) {
            debug!("Live query on {} refused: {e}", query.path());
            let _ = tx.send(Err(e));
            return rx;
        }
        let _ = tx.send(Ok(run_query(&state.collections, &query)));
        trace!("Live query attached to {}", query.path());
        state.listeners.push(Listener { query, tx });
        rx
    }
}

#[async_trait::async_trait]
impl Identity for LocalBackend {
    async fn sign_in(&self, email: &str, password: &str) -> std::result::Result<User, AuthError> {
        let user = {
            let state = self.lock();
            if !state.online {
                return Err(offline());
            }
            match state.accounts.get(&normalize_email(email)) {
                Some(account) if account.password == password => account.user.clone(),
                _ => {
                    return Err(AuthError::new(
                        AuthErrorCode::InvalidCredential,
                        "The supplied credentials are incorrect",
                    ))
                }
            }
        };
        self.set_auth(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> std::result::Result<User, AuthError> {
        let email = normalize_email(email);
        let user = {
            let mut state = self.lock();
            if !state.online {
                return Err(offline());
            }
            if !is_valid_email(&email) {
                return Err(AuthError::new(
                    AuthErrorCode::InvalidEmail,
                    format!("'{email}' is not a valid email address"),
                ));
            }
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(AuthError::new(
                    AuthErrorCode::WeakPassword,
                    format!("Password should be at least {MIN_PASSWORD_LEN} characters"),
                ));
            }
            if state.accounts.contains_key(&email) {
                return Err(AuthError::new(
                    AuthErrorCode::EmailAlreadyInUse,
                    "The email address is already in use by another account",
                ));
            }
            let user = User::new(new_id(), email.clone());
            state.accounts.insert(
                email,
                Account {
                    user: user.clone(),
                    password: password.to_string(),
                },
            );
            user
        };
        self.set_auth(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> std::result::Result<(), AuthError> {
        self.set_auth(None);
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<Option<User>> {
        self.auth.subscribe()
    }
}

fn offline() -> AuthError {
    AuthError::new(
        AuthErrorCode::Other(NETWORK_REQUEST_FAILED.to_string()),
        "A network error has occurred",
    )
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

/// True when `path` lives under `users/{uid}/` for the given signed-in `uid`.
fn is_owner(uid: Option<&str>, path: &str) -> bool {
    let mut segments = path.split('/');
    match (uid, segments.next(), segments.next()) {
        (Some(uid), Some(USERS), Some(owner)) => uid == owner,
        _ => false,
    }
}

fn split_document_path(document_path: &str) -> std::result::Result<(&str, &str), RemoteError> {
    document_path
        .rsplit_once('/')
        .filter(|(collection, id)| !collection.is_empty() && !id.is_empty())
        .ok_or_else(|| RemoteError::InvalidDocument(format!("'{document_path}' is not a document path")))
}

/// Applies the fields of `update` onto `existing`. Both must be JSON objects.
fn merge_fields(
    existing: &mut serde_json::Value,
    update: serde_json::Value,
) -> std::result::Result<(), RemoteError> {
    let serde_json::Value::Object(fields) = update else {
        return Err(RemoteError::InvalidDocument(
            "An update must be a JSON object".to_string(),
        ));
    };
    let target = existing.as_object_mut().ok_or_else(|| {
        RemoteError::InvalidDocument("The stored document is not a JSON object".to_string())
    })?;
    for (key, value) in fields {
        target.insert(key, value);
    }
    Ok(())
}

fn run_query(
    collections: &BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    query: &Query,
) -> Vec<Document> {
    let mut documents: Vec<Document> = collections
        .get(query.path())
        .map(|docs| {
            docs.iter()
                .map(|(id, data)| Document {
                    id: id.clone(),
                    data: data.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    if let Some((field, direction)) = query.ordering() {
        documents.sort_by(|a, b| {
            let ordering = compare_values(a.data.get(field), b.data.get(field))
                .then_with(|| a.id.cmp(&b.id));
            match direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });
    }
    documents
}

/// Orders field values the way the hosted database does for the types we store: missing values
/// first, then numbers, then strings, then timestamps.
fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    fn rank(v: Option<&serde_json::Value>) -> u8 {
        match v {
            None | Some(serde_json::Value::Null) => 0,
            Some(serde_json::Value::Number(_)) => 1,
            Some(serde_json::Value::String(_)) => 2,
            Some(v) if timestamp_of(v).is_some() => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(serde_json::Value::Number(x)), Some(serde_json::Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(serde_json::Value::String(x)), Some(serde_json::Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (timestamp_of(x), timestamp_of(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => rank(a).cmp(&rank(b)),
        },
        _ => rank(a).cmp(&rank(b)),
    }
}

fn timestamp_of(v: &serde_json::Value) -> Option<(i64, u64)> {
    let seconds = v.get("seconds")?.as_i64()?;
    let nanos = v.get("nanoseconds")?.as_u64()?;
    Some((seconds, nanos))
}

/// Loads transaction documents from a CSV-formatted string with the columns
/// `type,amount,description,date` where `date` is `YYYY-MM-DD`.
fn load_csv(csv_data: &str) -> Result<Vec<TransactionDocument>> {
    use crate::model::{Amount, Timestamp, TransactionType};
    use chrono::NaiveDate;
    use std::str::FromStr;

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(Cursor::new(csv_data.as_bytes()));

    let mut documents = Vec::new();
    for (ix, result) in rdr.records().enumerate() {
        let record = result?;
        let field = |n: usize| {
            record
                .get(n)
                .with_context(|| format!("Missing column {n} in demo row {}", ix + 1))
        };
        let transaction_type = TransactionType::from_str(field(0)?)?;
        let amount = Amount::from_str(field(1)?)?;
        let description = field(2)?.to_string();
        let date = NaiveDate::parse_from_str(field(3)?, "%Y-%m-%d")?
            .and_hms_opt(12, 0, 0)
            .context("Invalid time of day")?
            .and_utc();
        documents.push(TransactionDocument {
            transaction_type,
            amount,
            description,
            date: Timestamp::from(date),
        });
    }
    Ok(documents)
}

/// Demo data for a small taco stand.
const DEMO_TRANSACTIONS: &str = r##"type,amount,description,date
income,1850.00,Ventas de tacos fin de semana,2024-03-30
expense,620.50,Compra de tortillas y carne,2024-03-28
income,940.00,Pedido para evento,2024-03-22
expense,300.00,Gas para el puesto,2024-03-15
expense,1200.00,Renta del local,2024-03-01
income,2100.00,Ventas de tacos fin de semana,2024-02-24
expense,580.25,Compra de tortillas y carne,2024-02-21
expense,1200.00,Renta del local,2024-02-01
income,1675.00,Ventas de tacos fin de semana,2024-01-27
expense,450.00,Reparación de la plancha,2024-01-12
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{transaction_path, DATE_FIELD};
    use serde_json::json;

    fn doc(seconds: i64, amount: f64) -> serde_json::Value {
        json!({
            "type": "income",
            "amount": amount,
            "description": "venta",
            "date": { "seconds": seconds, "nanoseconds": 0 }
        })
    }

    fn query(uid: &str) -> Query {
        Query::new(transactions_path(uid)).order_by(DATE_FIELD, Direction::Descending)
    }

    #[tokio::test]
    async fn test_sign_up_and_sign_in() {
        let backend = LocalBackend::new();
        let state = backend.auth_state();
        assert!(state.borrow().is_none());

        let user = backend.sign_up("A@B.com", "secret1").await.unwrap();
        assert_eq!(user.email(), "a@b.com");
        assert_eq!(state.borrow().as_ref(), Some(&user));

        backend.sign_out().await.unwrap();
        assert!(state.borrow().is_none());

        let again = backend.sign_in("a@b.com", "secret1").await.unwrap();
        assert_eq!(again, user);
    }

    #[tokio::test]
    async fn test_auth_errors() {
        let backend = LocalBackend::new();
        backend.sign_up("a@b.com", "secret1").await.unwrap();

        let dup = backend.sign_up("a@b.com", "secret2").await.unwrap_err();
        assert_eq!(dup.code(), &AuthErrorCode::EmailAlreadyInUse);

        let weak = backend.sign_up("c@d.com", "123").await.unwrap_err();
        assert_eq!(weak.code(), &AuthErrorCode::WeakPassword);

        let invalid = backend.sign_up("not-an-email", "secret1").await.unwrap_err();
        assert_eq!(invalid.code(), &AuthErrorCode::InvalidEmail);

        let wrong = backend.sign_in("a@b.com", "nope").await.unwrap_err();
        assert_eq!(wrong.code(), &AuthErrorCode::InvalidCredential);

        let unknown = backend.sign_in("x@y.com", "secret1").await.unwrap_err();
        assert_eq!(unknown.code(), &AuthErrorCode::InvalidCredential);
    }

    #[tokio::test]
    async fn test_access_rule() {
        let backend = LocalBackend::new();
        let user = backend.sign_up("a@b.com", "secret1").await.unwrap();
        let own = transactions_path(user.uid());
        assert!(backend.add(&own, doc(1, 1.0)).await.is_ok());

        let err = backend
            .add(&transactions_path("someone-else"), doc(1, 1.0))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());

        backend.sign_out().await.unwrap();
        let err = backend.add(&own, doc(1, 1.0)).await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_live_query_ordering_and_updates() {
        let backend = LocalBackend::new();
        let user = backend.sign_up("a@b.com", "secret1").await.unwrap();
        let path = transactions_path(user.uid());
        let mut rx = backend.listen(query(user.uid()));
        assert_eq!(rx.recv().await.unwrap().unwrap(), vec![]);

        let old = backend.add(&path, doc(100, 1.0)).await.unwrap();
        let _ = rx.recv().await.unwrap().unwrap();
        let new = backend.add(&path, doc(200, 2.0)).await.unwrap();
        let snapshot = rx.recv().await.unwrap().unwrap();
        let ids: Vec<&str> = snapshot.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![new.as_str(), old.as_str()]);

        backend
            .update(&transaction_path(user.uid(), &old), json!({ "date": { "seconds": 300, "nanoseconds": 0 } }))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap().unwrap();
        assert_eq!(snapshot[0].id, old);
        assert_eq!(snapshot[0].data["amount"], 1.0);

        backend
            .delete(&transaction_path(user.uid(), &new))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_listen_denied() {
        let backend = LocalBackend::new();
        let mut rx = backend.listen(query("u1"));
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(
            err,
            RemoteError::PermissionDenied {
                path: "users/u1/transactions".to_string()
            }
        );
        assert!(rx.recv().await.is_none());
        assert_eq!(backend.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_out_revokes_live_query() {
        let backend = LocalBackend::new();
        let user = backend.sign_up("a@b.com", "secret1").await.unwrap();
        let mut rx = backend.listen(query(user.uid()));
        let _ = rx.recv().await.unwrap();
        assert_eq!(backend.listener_count(), 1);

        backend.sign_out().await.unwrap();
        assert!(rx.recv().await.unwrap().unwrap_err().is_permission_denied());
        assert_eq!(backend.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_offline() {
        let backend = LocalBackend::new();
        let user = backend.sign_up("a@b.com", "secret1").await.unwrap();
        let mut rx = backend.listen(query(user.uid()));
        let _ = rx.recv().await.unwrap();

        backend.set_online(false);
        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(RemoteError::Unavailable(_))
        ));
        let err = backend
            .add(&transactions_path(user.uid()), doc(1, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
        assert!(backend.sign_in("a@b.com", "secret1").await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let backend = LocalBackend::new();
        let user = backend.sign_up("a@b.com", "secret1").await.unwrap();
        let err = backend
            .update(&transaction_path(user.uid(), "nope"), json!({ "amount": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_seed_demo() {
        let backend = LocalBackend::new();
        let ids = backend.seed_demo("u1").unwrap();
        assert_eq!(ids.len(), 10);
        let body = backend.get(&transaction_path("u1", &ids[0])).unwrap();
        let doc = TransactionDocument::from_value(body).unwrap();
        assert_eq!(doc.description, "Ventas de tacos fin de semana");
    }

    #[test]
    fn test_is_owner() {
        assert!(is_owner(Some("u1"), "users/u1/transactions"));
        assert!(is_owner(Some("u1"), "users/u1/transactions/t1"));
        assert!(!is_owner(Some("u2"), "users/u1/transactions"));
        assert!(!is_owner(None, "users/u1/transactions"));
        assert!(!is_owner(Some("u1"), "other/u1/transactions"));
    }

    #[test]
    fn test_compare_values() {
        let a = json!({ "seconds": 1, "nanoseconds": 5 });
        let b = json!({ "seconds": 1, "nanoseconds": 9 });
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(compare_values(None, Some(&json!("x"))), Ordering::Less);
    }
}
