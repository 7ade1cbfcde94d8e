use uuid::Uuid;

use crate::{Error, TheoryId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub theory_id: TheoryId,
    pub author_id: UserId,
    pub text: String,
    pub created_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub theory_id: TheoryId,
    pub author_id: UserId,
    pub text: String,
}

impl NewComment {
    /// Blank comments are not an error, callers are expected to drop them
    /// before reaching a store
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.text)
    }
}
