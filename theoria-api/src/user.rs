use std::fmt;

use anyhow::Context;
use uuid::Uuid;

use crate::{Error, STUB_UUID};

pub const BCRYPT_COST: u32 = 10;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,

    #[serde(default)]
    pub photo_url: Option<String>,

    #[serde(default)]
    pub bio: Option<String>,

    #[serde(default)]
    pub followers_count: u64,

    #[serde(default)]
    pub following_count: u64,
}

impl User {
    pub fn new(id: UserId, display_name: String) -> User {
        User {
            id,
            display_name,
            photo_url: None,
            bio: None,
            followers_count: 0,
            following_count: 0,
        }
    }
}

/// Admin-side user creation
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,

    /// Login name, distinct from the display name
    pub name: String,
    pub display_name: String,
    pub initial_password_hash: String,
}

impl NewUser {
    /// Hashes the password locally, so that the clear-text password never
    /// reaches the admin endpoint
    pub fn new(
        id: UserId,
        name: String,
        display_name: String,
        initial_password: &str,
    ) -> anyhow::Result<NewUser> {
        Ok(NewUser {
            id,
            name,
            display_name,
            initial_password_hash: bcrypt::hash(initial_password, BCRYPT_COST)
                .context("hashing initial password")?,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.name)?;
        crate::validate_string(&self.display_name)?;
        crate::validate_string(&self.initial_password_hash)?;
        if self.name.is_empty()
            || self
                .name
                .chars()
                .any(|c| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
        {
            return Err(Error::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}

/// Fields of the signed-in user's own document that may be rewritten
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProfileUpdate {
    pub bio: String,

    /// Left untouched when `None`
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.bio)?;
        if let Some(url) = &self.photo_url {
            crate::validate_string(url)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, user: &mut User) {
        user.bio = Some(self.bio.clone());
        if let Some(url) = &self.photo_url {
            user.photo_url = Some(url.clone());
        }
    }
}
