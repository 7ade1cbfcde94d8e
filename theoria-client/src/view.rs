use crate::api::{Comment, Theory, TheoryId, User, UserId};

/// Display name shown for authors that cannot be resolved
pub const SENTINEL_NAME: &str = "User";

/// Avatar shown for authors that cannot be resolved or have no picture
pub const DEFAULT_AVATAR: &str = "/default-avatar.png";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthorView {
    /// The reference this view was built from, if there was one
    pub id: Option<UserId>,
    pub display_name: String,
    pub photo_url: String,
}

impl AuthorView {
    pub fn sentinel(id: Option<UserId>) -> AuthorView {
        AuthorView {
            id,
            display_name: String::from(SENTINEL_NAME),
            photo_url: String::from(DEFAULT_AVATAR),
        }
    }

    /// Empty fields fall back to the sentinel values, like absent ones
    pub fn of(user: &User) -> AuthorView {
        let non_empty = |s: &str| (!s.is_empty()).then(|| String::from(s));
        AuthorView {
            id: Some(user.id),
            display_name: non_empty(&user.display_name)
                .unwrap_or_else(|| String::from(SENTINEL_NAME)),
            photo_url: user
                .photo_url
                .as_deref()
                .and_then(non_empty)
                .unwrap_or_else(|| String::from(DEFAULT_AVATAR)),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: AuthorView,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TheoryView {
    pub theory: Theory,
    pub author: AuthorView,

    /// Newest first
    pub comments: Vec<CommentView>,
}

impl TheoryView {
    pub fn id(&self) -> TheoryId {
        self.theory.id
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.theory.is_liked_by(user)
    }

    /// Inserts `c` at its place in the newest-first order, ahead of comments
    /// with the same date
    pub fn insert_comment(&mut self, c: CommentView) {
        let idx = self
            .comments
            .partition_point(|o| o.comment.created_at > c.comment.created_at);
        self.comments.insert(idx, c);
    }
}

pub fn share_url(base: &str, theory: TheoryId) -> String {
    format!("{}/theory/{}", base.trim_end_matches('/'), theory)
}
