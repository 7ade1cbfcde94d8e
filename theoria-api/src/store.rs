use async_trait::async_trait;

use crate::{
    Comment, Error, NewComment, NewTheory, ProfileUpdate, Theory, TheoryId, User, UserId,
};

/// The document store holding the `users` and `theories` collections, and
/// the `comments` sub-collection of each theory
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, id: UserId) -> anyhow::Result<Option<User>>;
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;

    /// Newest first
    async fn list_theories(&self) -> anyhow::Result<Vec<Theory>>;
    async fn get_theory(&self, id: TheoryId) -> anyhow::Result<Option<Theory>>;
    async fn add_theory(&self, t: NewTheory) -> anyhow::Result<Theory>;

    /// Newest first
    async fn list_comments(&self, theory: TheoryId) -> anyhow::Result<Vec<Comment>>;
    async fn add_comment(&self, c: NewComment) -> anyhow::Result<Comment>;

    /// Adds `user` to or removes it from the likers of `theory`, and returns
    /// the resulting snapshot. Must be atomic: concurrent calls for different
    /// users may not lose each other's update.
    async fn set_like(&self, theory: TheoryId, user: UserId, liked: bool)
        -> anyhow::Result<Theory>;

    async fn update_profile(&self, user: UserId, update: ProfileUpdate) -> anyhow::Result<User>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, path: &str, data: Vec<u8>) -> anyhow::Result<()>;
    async fn download_url(&self, path: &str) -> anyhow::Result<String>;
}

pub fn profile_picture_path(user: UserId) -> String {
    format!("profilePics/{}", user)
}

/// Storage paths are relative and `/`-separated, with no empty, `.` or `..`
/// component
pub fn validate_storage_path(path: &str) -> Result<(), Error> {
    crate::validate_string(path)?;
    let invalid = path.is_empty()
        || path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == ".." || c.contains('\\'));
    if invalid {
        return Err(Error::InvalidPath(String::from(path)));
    }
    Ok(())
}
