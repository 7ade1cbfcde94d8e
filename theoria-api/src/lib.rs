use chrono::Utc;

mod auth;
pub use auth::{AuthProvider, AuthToken, NewSession};

mod comment;
pub use comment::{Comment, CommentId, NewComment};

mod error;
pub use error::Error;

mod store;
pub use store::{profile_picture_path, validate_storage_path, ObjectStorage, Store};

mod theory;
pub use theory::{LikeRequest, NewTheory, Theory, TheoryId};

mod user;
pub use user::{NewUser, ProfileUpdate, User, UserId};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

// Strings end up in postgres text columns, which cannot hold NUL bytes. Every
// user-provided string goes through here before reaching a store.
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bytes_are_rejected() {
        assert_eq!(validate_string("hello"), Ok(()));
        assert_eq!(validate_string(""), Ok(()));
        assert_eq!(
            validate_string("hel\0lo"),
            Err(Error::NullByteInString(String::from("hel\0lo")))
        );
    }
}
