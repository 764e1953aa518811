//! Binds the identity provider's authentication state to the store and keeps the user on a route
//! they are allowed to see.
//!
//! The access policy only knows two routes. A signed-in user is sent from the landing route to the
//! dashboard, a signed-out user is sent from the dashboard to the landing route, and every other
//! route is left alone. Nothing is redirected while the store is still loading.

use crate::model::User;
use crate::store::{Subscription, TransactionStore};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, trace};

pub const LANDING_PATH: &str = "/";
pub const DASHBOARD_PATH: &str = "/dashboard";

/// A location in the app.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Route {
    /// The unauthenticated landing view.
    Landing,
    /// The authenticated dashboard.
    Dashboard,
    Other(String),
}

impl Route {
    /// The route at `path`. Unknown paths become `Route::Other`.
    pub fn parse(path: &str) -> Self {
        let path = path.trim();
        match path {
            LANDING_PATH | "" => Route::Landing,
            DASHBOARD_PATH => Route::Dashboard,
            _ => Route::Other(path.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Route::Landing => LANDING_PATH,
            Route::Dashboard => DASHBOARD_PATH,
            Route::Other(path) => path,
        }
    }
}

impl FromStr for Route {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Route::parse(s))
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Where a user on `route` must be sent, if anywhere.
pub fn redirect_for(route: &Route, authenticated: bool, is_loading: bool) -> Option<Route> {
    if is_loading {
        return None;
    }
    match (route, authenticated) {
        (Route::Landing, true) => Some(Route::Dashboard),
        (Route::Dashboard, false) => Some(Route::Landing),
        _ => None,
    }
}

/// Owns the current route.
pub trait Navigator: Send + Sync {
    fn current(&self) -> Route;

    /// Goes to `route`, adding it to the history.
    fn push(&self, route: Route);

    /// Goes to `route` in place of the current entry.
    fn replace(&self, route: Route);
}

/// An in-memory navigation history. Clones share the same history.
#[derive(Debug, Clone)]
pub struct History {
    entries: Arc<Mutex<Vec<Route>>>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(Route::Landing)
    }
}

impl History {
    pub fn new(start: Route) -> Self {
        Self {
            entries: Arc::new(Mutex::new(vec![start])),
        }
    }

    /// Every route visited, oldest first. Redirects replace the entry they redirected from.
    pub fn entries(&self) -> Vec<Route> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Route>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Navigator for History {
    fn current(&self) -> Route {
        self.lock().last().cloned().unwrap_or(Route::Landing)
    }

    fn push(&self, route: Route) {
        self.lock().push(route);
    }

    fn replace(&self, route: Route) {
        let mut entries = self.lock();
        entries.pop();
        entries.push(route);
    }
}

/// Pushes every authentication state into the store, keeps exactly one live query open for the
/// signed-in user and applies the route policy.
pub struct SessionBinder {
    store: TransactionStore,
    navigator: Arc<dyn Navigator>,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionBinder {
    pub fn new(store: TransactionStore, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            store,
            navigator,
            subscription: Mutex::new(None),
        }
    }

    /// Applies authentication states until the provider goes away.
    pub async fn run(&self, mut auth_state: watch::Receiver<Option<User>>) {
        loop {
            let user = auth_state.borrow_and_update().clone();
            self.apply(user);
            if auth_state.changed().await.is_err() {
                debug!("The identity provider closed its auth state");
                break;
            }
        }
    }

    /// Handles one authentication state.
    pub fn apply(&self, user: Option<User>) {
        match &user {
            Some(u) => info!("Signed in as {}", u.email()),
            None => debug!("No user is signed in"),
        }
        self.follow(user.as_ref());
        self.store.set_user(user);
        self.enforce_route();
    }

    /// Goes to `route` and then applies the route policy. Returns where the user ended up.
    pub fn navigate(&self, route: Route) -> Route {
        self.navigator.push(route);
        self.enforce_route();
        self.navigator.current()
    }

    /// Redirects the current route if the policy requires it.
    pub fn enforce_route(&self) -> Option<Route> {
        let current = self.navigator.current();
        let state = self.store.state();
        let target = redirect_for(&current, state.user().is_some(), state.is_loading())?;
        debug!("Redirecting from {current} to {target}");
        self.navigator.replace(target.clone());
        Some(target)
    }

    /// The current route.
    pub fn route(&self) -> Route {
        self.navigator.current()
    }

    /// Cancels the live query, if one is open. Call this before signing out so that the
    /// revoked query does not report a failure.
    pub fn detach(&self) {
        if let Some(subscription) = self.lock().take() {
            trace!("Detaching from {}", subscription.path());
        }
    }

    /// Opens a live query for `user` unless one is already open for them. Any query for another
    /// user is cancelled first.
    fn follow(&self, user: Option<&User>) {
        let mut current = self.lock();
        let wanted = user.map(|u| crate::api::transactions_path(u.uid()));
        let keep = match (current.as_ref(), wanted.as_deref()) {
            (Some(subscription), Some(path)) => {
                subscription.path() == path && subscription.is_active()
            }
            _ => false,
        };
        if keep {
            return;
        }
        // Cancel before opening so two queries never write to the store at once.
        current.take();
        if let Some(user) = user {
            *current = Some(self.store.subscribe_to_transactions(user.uid()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Identity;
    use crate::test::TestEnv;

    fn binder(env: &TestEnv, start: Route) -> (SessionBinder, History) {
        let history = History::new(start);
        let binder = SessionBinder::new(env.store(), Arc::new(history.clone()));
        (binder, history)
    }

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::from_str("/").unwrap(), Route::Landing);
        assert_eq!(Route::from_str("/dashboard").unwrap(), Route::Dashboard);
        assert_eq!(
            Route::from_str("/about").unwrap(),
            Route::Other("/about".to_string())
        );
        assert_eq!(Route::Dashboard.to_string(), "/dashboard");
    }

    #[test]
    fn test_redirect_policy() {
        assert_eq!(redirect_for(&Route::Dashboard, false, false), Some(Route::Landing));
        assert_eq!(redirect_for(&Route::Landing, true, false), Some(Route::Dashboard));
        assert_eq!(redirect_for(&Route::Dashboard, true, false), None);
        assert_eq!(redirect_for(&Route::Landing, false, false), None);
        assert_eq!(redirect_for(&Route::Other("/x".into()), false, false), None);
        assert_eq!(redirect_for(&Route::Other("/x".into()), true, false), None);
        assert_eq!(redirect_for(&Route::Dashboard, false, true), None);
        assert_eq!(redirect_for(&Route::Landing, true, true), None);
    }

    #[tokio::test]
    async fn test_no_redirect_while_loading() {
        let env = TestEnv::new();
        let (binder, history) = binder(&env, Route::Dashboard);
        assert_eq!(binder.enforce_route(), None);
        assert_eq!(history.current(), Route::Dashboard);
    }

    #[tokio::test]
    async fn test_signed_out_user_leaves_dashboard() {
        let env = TestEnv::new();
        let (binder, history) = binder(&env, Route::Dashboard);
        binder.apply(None);
        assert_eq!(history.current(), Route::Landing);
        assert!(!env.store().is_loading());

        assert_eq!(binder.navigate(Route::Dashboard), Route::Landing);
        assert_eq!(binder.navigate(Route::Other("/about".into())), Route::Other("/about".into()));
    }

    #[tokio::test]
    async fn test_signed_in_user_leaves_landing() {
        let env = TestEnv::new();
        let user = env.sign_up("a@b.com").await;
        let (binder, history) = binder(&env, Route::Landing);
        binder.apply(Some(user.clone()));

        assert_eq!(history.current(), Route::Dashboard);
        assert_eq!(env.store().user(), Some(user));
        assert_eq!(binder.navigate(Route::Landing), Route::Dashboard);
        assert_eq!(binder.enforce_route(), None);
        assert_eq!(history.entries(), vec![Route::Dashboard, Route::Dashboard]);
    }

    #[tokio::test]
    async fn test_binder_follows_auth_state() {
        let env = TestEnv::new();
        let backend = env.backend();
        let (binder, history) = binder(&env, Route::Landing);
        let binder = Arc::new(binder);
        let runner = binder.clone();
        let auth_state = backend.auth_state();
        let task = tokio::spawn(async move { runner.run(auth_state).await });

        env.wait_for(|s| !s.is_loading()).await;
        assert_eq!(history.current(), Route::Landing);

        let user = env.sign_up("a@b.com").await;
        backend.seed_demo(user.uid()).unwrap();
        let state = env.wait_for(|s| s.transactions().len() == 10).await;
        assert_eq!(state.user(), Some(&user));
        assert_eq!(history.current(), Route::Dashboard);

        binder.detach();
        env.store().logout(&backend).await.unwrap();
        for _ in 0..100 {
            if history.current() == Route::Landing {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(history.current(), Route::Landing);
        assert!(env.store().transactions().is_empty());
        assert!(env.events().is_empty());

        task.abort();
    }

    #[tokio::test]
    async fn test_switching_users_cancels_previous_query() {
        let env = TestEnv::new();
        let backend = env.backend();
        let first = env.sign_up("a@b.com").await;
        backend.seed_demo(first.uid()).unwrap();
        let (binder, _) = binder(&env, Route::Dashboard);
        binder.apply(Some(first.clone()));
        env.wait_for(|s| s.transactions().len() == 10).await;

        binder.apply(Some(first));
        assert_eq!(backend.listener_count(), 1);

        binder.detach();
        let second = env.sign_up("c@d.com").await;
        binder.apply(Some(second.clone()));
        let state = env.wait_for(|s| s.transactions().is_empty()).await;
        assert_eq!(state.user(), Some(&second));
        tokio::task::yield_now().await;
        assert_eq!(backend.listener_count(), 1);
        assert!(env.events().is_empty());
    }
}
