use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    api::{AuthProvider, Store, UserId},
    Dashboard, Session,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    Login,
    Feed,
}

/// Holds the session of whoever the auth provider says is signed in
pub struct App<S: ?Sized> {
    store: Arc<S>,
    session: Option<Session<S>>,
}

impl<S: ?Sized + Store> App<S> {
    pub fn new(store: Arc<S>) -> App<S> {
        App {
            store,
            session: None,
        }
    }

    pub fn route(&self) -> Route {
        match self.session {
            Some(_) => Route::Feed,
            None => Route::Login,
        }
    }

    pub fn session(&self) -> Option<&Session<S>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session<S>> {
        self.session.as_mut()
    }

    /// Starts a loaded session on sign-in, drops it on sign-out
    pub async fn auth_changed(&mut self, user: Option<UserId>) -> Route {
        match user {
            None => {
                if let Some(s) = self.session.take() {
                    tracing::info!(user = %s.user(), "signed out");
                }
            }
            Some(user) => {
                if self.session.as_ref().map(|s| s.user()) != Some(user) {
                    tracing::info!(%user, "signed in");
                    let mut session = Session::new(self.store.clone(), user);
                    session.load().await;
                    self.session = Some(session);
                }
            }
        }
        self.route()
    }

    /// Catches up with the provider's current state
    pub async fn follow<A>(&mut self, auth: &A) -> Route
    where
        A: ?Sized + AuthProvider,
    {
        self.auth_changed(auth.current_user()).await
    }

    /// Waits for the next sign-in or sign-out, returning `None` once the
    /// provider is gone
    pub async fn next_change(&mut self, changes: &mut watch::Receiver<Option<UserId>>) -> Option<Route> {
        changes.changed().await.ok()?;
        let user = *changes.borrow_and_update();
        Some(self.auth_changed(user).await)
    }

    pub async fn sign_out<A>(&mut self, auth: &A) -> Route
    where
        A: ?Sized + AuthProvider,
    {
        match auth.sign_out().await {
            Ok(()) => self.auth_changed(None).await,
            Err(err) => {
                tracing::error!(?err, "error signing out");
                self.route()
            }
        }
    }

    pub async fn dashboard(&self) -> Option<Dashboard> {
        let user = self.session.as_ref()?.user();
        Some(Dashboard::load(&*self.store, user).await)
    }
}
