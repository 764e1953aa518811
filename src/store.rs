//! The client-side transaction store.
//!
//! `TransactionStore` is the single source of truth for the signed-in user and the transactions
//! they currently have. It is created once at startup and handed to every component that needs it;
//! clones share the same state.
//!
//! The live query is the only writer of the transaction list. Mutations are sent to the document
//! collection without waiting for them and without touching the local list: a successful write
//! shows up when the next snapshot arrives, a failed one is published on the `ErrorChannel`.
//!
//! Spawning subscriptions and writes requires a running Tokio runtime.

use crate::api::{
    transaction_path, transactions_path, Collection, Direction, Identity, Query, DATE_FIELD,
};
use crate::channel::{ErrorChannel, EventName, Operation, PermissionError};
use crate::error::{AuthError, RemoteError};
use crate::model::{
    sort_newest_first, Transaction, TransactionDocument, TransactionInput, User,
};
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// The message recorded in `StoreState::error` when the live query fails.
pub const LOAD_ERROR: &str = "No se pudieron cargar las transacciones.";

/// A snapshot of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreState {
    user: Option<User>,
    transactions: Vec<Transaction>,
    is_loading: bool,
    error: Option<String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            user: None,
            transactions: Vec::new(),
            is_loading: true,
            error: None,
        }
    }
}

impl StoreState {
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// The user's transactions, newest first.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// True until the first authentication state has been received.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// The last failure seen by the live query. It stays set until `clear_error` is called.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// The outcome of a write: the new document id for a create, `None` for update and delete.
pub type WriteResult = std::result::Result<Option<String>, RemoteError>;

/// A write that has been sent but not necessarily completed. Dropping it does not cancel the write.
pub struct PendingWrite {
    handle: JoinHandle<WriteResult>,
}

impl PendingWrite {
    /// Waits for the write to settle. Callers that follow the fire-and-forget contract never need
    /// to call this; failures have already been published by the time it returns.
    pub async fn settled(self) -> WriteResult {
        self.handle
            .await
            .unwrap_or_else(|e| Err(RemoteError::Unavailable(format!("The write was lost: {e}"))))
    }
}

/// A running live query. Cancel it when the user changes or the owner goes away; dropping the
/// handle also cancels it.
pub struct Subscription {
    path: String,
    task: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    /// The collection path this subscription listens to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// False once the live query has failed or been cancelled.
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Stops delivering snapshots to the store.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            trace!("Cancelling live query on {}", self.path);
        }
        // Aborting does not stop a poll that is already running, the flag does.
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

/// The transaction store. See the module documentation.
#[derive(Clone)]
pub struct TransactionStore {
    state: Arc<watch::Sender<StoreState>>,
    collection: Arc<dyn Collection>,
    channel: ErrorChannel,
}

impl Debug for TransactionStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStore")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl TransactionStore {
    pub fn new(collection: Arc<dyn Collection>, channel: ErrorChannel) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            state: Arc::new(state),
            collection,
            channel,
        }
    }

    /// A copy of the current state.
    pub fn state(&self) -> StoreState {
        self.state.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.borrow().transactions.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Observes the state. The receiver is notified after every change.
    pub fn watch(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Replaces the current user and clears the initial loading flag.
    pub fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|s| {
            s.user = user;
            s.is_loading = false;
        });
    }

    /// Forgets the last live query failure.
    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Signs out through `identity` and clears the user and the transactions. The local state is
    /// cleared even when the sign-out fails; the failure is returned to the caller.
    pub async fn logout(&self, identity: &dyn Identity) -> std::result::Result<(), AuthError> {
        let result = identity.sign_out().await;
        self.state.send_modify(|s| {
            s.user = None;
            s.transactions.clear();
        });
        match &result {
            Ok(()) => info!("Signed out"),
            Err(e) => warn!("Sign-out failed, local session cleared anyway: {e}"),
        }
        result
    }

    /// Opens a live query on `users/{user_id}/transactions` ordered by date, newest first. Every
    /// snapshot replaces the whole transaction list. A failed query leaves the list alone, records
    /// `LOAD_ERROR` and publishes a `list` permission error.
    ///
    /// Only one subscription should be active at a time. Cancel the previous one before calling
    /// this again, otherwise both will write to the store.
    pub fn subscribe_to_transactions(&self, user_id: &str) -> Subscription {
        let path = transactions_path(user_id);
        let query = Query::new(path.clone()).order_by(DATE_FIELD, Direction::Descending);
        let mut rx = self.collection.listen(query);
        let cancelled = Arc::new(AtomicBool::new(false));
        let writer = LiveWriter {
            state: self.state.clone(),
            cancelled: cancelled.clone(),
        };
        let channel = self.channel.clone();
        let task_path = path.clone();
        debug!("Subscribing to {path}");

        let task = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                match snapshot {
                    Ok(documents) => {
                        let transactions = decode_snapshot(documents);
                        trace!(
                            "Received {} transactions from {task_path}",
                            transactions.len()
                        );
                        if !writer.write(|s| s.transactions = transactions) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("The live query on {task_path} failed: {e}");
                        if !writer.write(|s| s.error = Some(LOAD_ERROR.to_string())) {
                            break;
                        }
                        channel.emit(
                            EventName::PermissionError,
                            &PermissionError::new(task_path.clone(), Operation::List),
                        );
                        break;
                    }
                }
            }
            trace!("Live query on {task_path} ended");
        });

        Subscription {
            path,
            task,
            cancelled,
        }
    }

    /// Sends a new transaction to `users/{user_id}/transactions` without waiting for it.
    pub fn add_transaction(&self, user_id: &str, input: &TransactionInput) -> PendingWrite {
        let path = transactions_path(user_id);
        let document = input.to_document();
        let collection = self.collection.clone();
        self.spawn_write(path, Operation::Create, Some(document), move |path, payload| {
            Box::pin(async move {
                let id = collection.add(&path, payload.unwrap_or_default()).await?;
                debug!("Created {path}/{id}");
                Ok(Some(id))
            })
        })
    }

    /// Sends every field of `transaction` except its id to the document it identifies, without
    /// waiting for it.
    pub fn update_transaction(&self, user_id: &str, transaction: &Transaction) -> PendingWrite {
        let path = transaction_path(user_id, transaction.id());
        let document = transaction.to_document();
        let collection = self.collection.clone();
        self.spawn_write(path, Operation::Update, Some(document), move |path, payload| {
            Box::pin(async move {
                collection.update(&path, payload.unwrap_or_default()).await?;
                debug!("Updated {path}");
                Ok(None)
            })
        })
    }

    /// Removes a transaction without waiting for it.
    pub fn delete_transaction(&self, user_id: &str, transaction_id: &str) -> PendingWrite {
        let path = transaction_path(user_id, transaction_id);
        let collection = self.collection.clone();
        self.spawn_write(path, Operation::Delete, None, move |path, _| {
            Box::pin(async move {
                collection.delete(&path).await?;
                debug!("Deleted {path}");
                Ok(None)
            })
        })
    }

    /// Runs `write` in the background. Any failure is published as a permission error carrying
    /// the path, the operation and the rejected payload.
    fn spawn_write<F>(
        &self,
        path: String,
        operation: Operation,
        document: Option<TransactionDocument>,
        write: F,
    ) -> PendingWrite
    where
        F: FnOnce(String, Option<Value>) -> WriteFuture + Send + 'static,
    {
        let channel = self.channel.clone();
        let handle = tokio::spawn(async move {
            let payload = match document.as_ref().map(TransactionDocument::to_value).transpose() {
                Ok(payload) => payload,
                Err(e) => {
                    let error = RemoteError::InvalidDocument(e.to_string());
                    publish(&channel, &path, operation, None, &error);
                    return Err(error);
                }
            };
            let result = write(path.clone(), payload.clone()).await;
            if let Err(e) = &result {
                publish(&channel, &path, operation, payload, e);
            }
            result
        });
        PendingWrite { handle }
    }
}

/// The live query's handle on the store. Once its subscription is cancelled every write is dropped.
struct LiveWriter {
    state: Arc<watch::Sender<StoreState>>,
    cancelled: Arc<AtomicBool>,
}

impl LiveWriter {
    /// Applies `change` unless the subscription has been cancelled. The flag is read under the
    /// state lock, so nothing is written once `Subscription::cancel` has returned.
    fn write(&self, change: impl FnOnce(&mut StoreState)) -> bool {
        self.state.send_if_modified(|s| {
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            change(s);
            true
        })
    }
}

type WriteFuture = std::pin::Pin<Box<dyn std::future::Future<Output = WriteResult> + Send>>;

fn publish(
    channel: &ErrorChannel,
    path: &str,
    operation: Operation,
    payload: Option<Value>,
    error: &RemoteError,
) {
    warn!("The {operation} request on {path} failed: {error}");
    let mut event = PermissionError::new(path, operation);
    if let Some(payload) = payload {
        event = event.with_request_data(payload);
    }
    channel.emit(EventName::PermissionError, &event);
}

/// Decodes every document of a snapshot. Documents that cannot be decoded are skipped.
fn decode_snapshot(documents: Vec<crate::api::Document>) -> Vec<Transaction> {
    let mut transactions: Vec<Transaction> = documents
        .into_iter()
        .filter_map(|doc| {
            let decoded = TransactionDocument::from_value(doc.data)
                .and_then(|body| Transaction::from_document(doc.id.clone(), body));
            match decoded {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("Skipping transaction {}: {e:#}", doc.id);
                    None
                }
            }
        })
        .collect();
    sort_newest_first(&mut transactions);
    transactions
}
