use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use anyhow::Context;

use crate::{
    api::{CommentId, NewComment, NewTheory, Store, Theory, TheoryId, User, UserId},
    assemble::{author_view, fetch_feed, resolve_users, UserCache},
    CommentView, TheoryView,
};

/// Everything the feed page of one signed-in user holds
pub struct Session<S: ?Sized> {
    store: Arc<S>,
    user: UserId,
    feed: Vec<TheoryView>,
    users: UserCache,
    suggested: Vec<User>,
    open_comments: Option<TheoryId>,
    drafts: HashMap<TheoryId, String>,
}

/// A like toggle that was applied locally and still has to reach the store
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingLike {
    pub theory: TheoryId,
    pub user: UserId,

    /// The state the user asked for
    pub liked: bool,

    prev_count: u64,
    prev_liked_by: BTreeSet<UserId>,
}

impl PendingLike {
    pub async fn send<S>(&self, store: &S) -> anyhow::Result<Theory>
    where
        S: ?Sized + Store,
    {
        store
            .set_like(self.theory, self.user, self.liked)
            .await
            .with_context(|| format!("setting like of {} on {} to {}", self.user, self.theory, self.liked))
    }
}

impl<S: ?Sized + Store> Session<S> {
    /// Creates an empty session, see `load` to fill it
    pub fn new(store: Arc<S>, user: UserId) -> Session<S> {
        Session {
            store,
            user,
            feed: Vec::new(),
            users: UserCache::new(),
            suggested: Vec::new(),
            open_comments: None,
            drafts: HashMap::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn feed(&self) -> &[TheoryView] {
        &self.feed
    }

    pub fn theory(&self, id: TheoryId) -> Option<&TheoryView> {
        self.feed.iter().find(|v| v.id() == id)
    }

    fn theory_mut(&mut self, id: TheoryId) -> Option<&mut TheoryView> {
        self.feed.iter_mut().find(|v| v.id() == id)
    }

    /// Every known user except the signed-in one
    pub fn suggested_users(&self) -> &[User] {
        &self.suggested
    }

    pub async fn load(&mut self) {
        self.refresh().await;
        self.refresh_suggested_users().await;
    }

    /// Reassembles the whole feed, looking every user up again
    pub async fn refresh(&mut self) {
        self.users.clear();
        self.feed = fetch_feed(&*self.store, &mut self.users).await;
    }

    pub async fn refresh_suggested_users(&mut self) {
        self.suggested = match self.store.list_users().await {
            Ok(users) => users.into_iter().filter(|u| u.id != self.user).collect(),
            Err(err) => {
                tracing::error!(?err, "error fetching users");
                Vec::new()
            }
        };
    }

    pub fn open_comments(&self) -> Option<TheoryId> {
        self.open_comments
    }

    /// Opens the comment panel of `theory`, or closes it if it was the open one
    pub fn toggle_comment_panel(&mut self, theory: TheoryId) {
        self.open_comments = match self.open_comments {
            Some(t) if t == theory => None,
            _ => Some(theory),
        };
    }

    pub fn set_draft(&mut self, theory: TheoryId, text: String) {
        self.drafts.insert(theory, text);
    }

    pub fn draft(&self, theory: TheoryId) -> &str {
        self.drafts.get(&theory).map(|s| s.as_str()).unwrap_or("")
    }

    pub async fn submit_draft(&mut self, theory: TheoryId) -> Option<CommentId> {
        let text = self.drafts.get(&theory).cloned().unwrap_or_default();
        self.submit_comment(theory, text).await
    }

    /// Appends a comment by the signed-in user and shows it right away.
    ///
    /// Blank texts are dropped without reaching the store. Store failures
    /// are logged and leave the session as it was.
    pub async fn submit_comment(&mut self, theory: TheoryId, text: String) -> Option<CommentId> {
        let c = NewComment {
            theory_id: theory,
            author_id: self.user,
            text,
        };
        if c.is_blank() {
            return None;
        }
        let comment = match self.store.add_comment(c).await {
            Ok(comment) => comment,
            Err(err) => {
                tracing::error!(?err, %theory, "error adding comment");
                return None;
            }
        };

        self.drafts.remove(&theory);
        if self.open_comments == Some(theory) {
            self.open_comments = None;
        }
        resolve_users(&*self.store, [comment.author_id], &mut self.users).await;
        let view = CommentView {
            author: author_view(Some(comment.author_id), &self.users),
            comment,
        };
        let id = view.comment.id;
        match self.theory_mut(theory) {
            Some(t) => t.insert_comment(view),
            None => tracing::warn!(%theory, "comment added to a theory that is not in the feed"),
        }
        Some(id)
    }

    /// Flips the signed-in user's like on `theory` locally.
    ///
    /// The returned `PendingLike` must be sent to the store and its result
    /// handed to `reconcile_like`.
    pub fn begin_toggle_like(&mut self, theory: TheoryId) -> Option<PendingLike> {
        let user = self.user;
        let Some(view) = self.theory_mut(theory) else {
            tracing::warn!(%theory, "like toggled on a theory that is not in the feed");
            return None;
        };
        let prev_count = view.theory.like_count;
        let prev_liked_by = view.theory.liked_by.clone();
        let liked = view.theory.toggle_like(user);
        Some(PendingLike {
            theory,
            user,
            liked,
            prev_count,
            prev_liked_by,
        })
    }

    /// Replaces the local like state with the store's snapshot, or undoes
    /// the optimistic change if the write failed
    pub fn reconcile_like(&mut self, pending: PendingLike, res: anyhow::Result<Theory>) {
        let Some(view) = self.theory_mut(pending.theory) else {
            return;
        };
        match res {
            Ok(snapshot) => view.theory = snapshot,
            Err(err) => {
                tracing::error!(?err, theory = %pending.theory, "error updating like");
                // a later toggle already moved away from this one's optimistic state
                if view.theory.is_liked_by(&pending.user) == pending.liked {
                    view.theory.like_count = pending.prev_count;
                    view.theory.liked_by = pending.prev_liked_by;
                }
            }
        }
    }

    /// Returns the like state the theory ends up in, if it is in the feed
    pub async fn toggle_like(&mut self, theory: TheoryId) -> Option<bool> {
        let pending = self.begin_toggle_like(theory)?;
        let res = pending.send(&*self.store).await;
        self.reconcile_like(pending, res);
        self.theory(theory).map(|v| v.is_liked_by(&self.user))
    }

    /// Publishes a theory by the signed-in user and puts it on top of the feed
    pub async fn post_theory(
        &mut self,
        title: String,
        description: String,
        media_url: Option<String>,
    ) -> anyhow::Result<TheoryId> {
        let t = NewTheory {
            author_id: self.user,
            title,
            description,
            media_url,
        };
        t.validate()?;
        let theory = self
            .store
            .add_theory(t)
            .await
            .context("creating theory")?;
        resolve_users(&*self.store, [self.user], &mut self.users).await;
        let id = theory.id;
        self.feed.insert(
            0,
            TheoryView {
                author: author_view(theory.author_id, &self.users),
                theory,
                comments: Vec::new(),
            },
        );
        Ok(id)
    }
}
