use std::{collections::BTreeSet, fmt};

use uuid::Uuid;

use crate::{Error, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct TheoryId(pub Uuid);

impl fmt::Display for TheoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Theory {
    pub id: TheoryId,

    /// Weak reference: the user may not exist (anymore), or the theory may
    /// have been created without one
    #[serde(default)]
    pub author_id: Option<UserId>,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub media_url: Option<String>,

    pub created_at: Time,

    /// Equal to `liked_by.len()` for any snapshot coming out of a store
    #[serde(default)]
    pub like_count: u64,

    #[serde(default)]
    pub liked_by: BTreeSet<UserId>,
}

impl Theory {
    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by.contains(user)
    }

    /// Flips `user`'s like, returning whether the theory is now liked by them
    pub fn toggle_like(&mut self, user: UserId) -> bool {
        let now_liked = !self.is_liked_by(&user);
        self.set_liked(user, now_liked);
        now_liked
    }

    /// Idempotent: setting the state the theory is already in changes nothing
    pub fn set_liked(&mut self, user: UserId, liked: bool) {
        if liked {
            if self.liked_by.insert(user) {
                self.like_count += 1;
            }
        } else if self.liked_by.remove(&user) {
            self.like_count = self.like_count.saturating_sub(1);
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewTheory {
    pub author_id: UserId,
    pub title: String,
    pub description: String,

    #[serde(default)]
    pub media_url: Option<String>,
}

impl NewTheory {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.title)?;
        crate::validate_string(&self.description)?;
        if let Some(url) = &self.media_url {
            crate::validate_string(url)?;
        }
        if self.title.trim().is_empty() {
            return Err(Error::EmptyTitle);
        }
        Ok(())
    }
}

/// Body of the like endpoint: the state the caller wants to end up in
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LikeRequest {
    pub user_id: UserId,
    pub liked: bool,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn user(n: u8) -> UserId {
        UserId(Uuid::from_bytes([n; 16]))
    }

    fn theory_liked_by(users: &[u8]) -> Theory {
        let liked_by: BTreeSet<UserId> = users.iter().map(|u| user(*u)).collect();
        Theory {
            id: TheoryId(Uuid::new_v4()),
            author_id: Some(user(0)),
            title: String::from("the moon is a hologram"),
            description: String::new(),
            media_url: None,
            created_at: Utc::now(),
            like_count: liked_by.len() as u64,
            liked_by,
        }
    }

    #[test]
    fn toggle_adds_then_removes() {
        let mut t = theory_liked_by(&[1, 2, 3]);
        let before = t.clone();

        assert!(t.toggle_like(user(4)));
        assert_eq!(t.like_count, 4);
        assert_eq!(t.liked_by, [1, 2, 3, 4].iter().map(|u| user(*u)).collect());

        assert!(!t.toggle_like(user(4)));
        assert_eq!(t.like_count, 3);
        assert_eq!(t, before);
    }

    #[test]
    fn duplicate_likers_are_counted_once() {
        let mut t = theory_liked_by(&[1, 1, 2]);
        assert_eq!(t.like_count, 2);
        let before = t.clone();
        t.toggle_like(user(1));
        t.toggle_like(user(1));
        assert_eq!(t, before);
    }

    #[test]
    fn toggle_existing_liker_unlikes() {
        let mut t = theory_liked_by(&[1, 2, 3]);
        assert!(!t.toggle_like(user(2)));
        assert_eq!(t.like_count, 2);
        assert!(!t.is_liked_by(&user(2)));
    }

    #[test]
    fn set_liked_is_idempotent() {
        let mut t = theory_liked_by(&[1]);
        t.set_liked(user(1), true);
        assert_eq!(t.like_count, 1);
        t.set_liked(user(2), false);
        assert_eq!(t.like_count, 1);
        t.set_liked(user(1), false);
        t.set_liked(user(1), false);
        assert_eq!(t.like_count, 0);
        assert!(t.liked_by.is_empty());
    }

    #[test]
    fn double_toggle_is_identity() {
        bolero::check!()
            .with_type::<(Vec<u8>, u8)>()
            .cloned()
            .for_each(|(likers, toggler)| {
                let mut t = theory_liked_by(&likers);
                let before = t.clone();
                t.toggle_like(user(toggler));
                assert_eq!(t.like_count as usize, t.liked_by.len());
                t.toggle_like(user(toggler));
                assert_eq!(t, before);
            })
    }

    #[test]
    fn count_follows_set_for_any_sequence() {
        bolero::check!()
            .with_type::<Vec<(u8, bool)>>()
            .cloned()
            .for_each(|ops| {
                let mut t = theory_liked_by(&[]);
                for (u, liked) in ops {
                    t.set_liked(user(u), liked);
                    assert_eq!(t.is_liked_by(&user(u)), liked);
                    assert_eq!(t.like_count as usize, t.liked_by.len());
                }
            })
    }

    #[test]
    fn empty_title_is_rejected() {
        let mut t = NewTheory {
            author_id: user(1),
            title: String::from("   "),
            description: String::from("it just is"),
            media_url: None,
        };
        assert_eq!(t.validate(), Err(Error::EmptyTitle));
        t.title = String::from("birds");
        assert_eq!(t.validate(), Ok(()));
    }

    #[test]
    fn legacy_documents_without_likes_parse() {
        let t: Theory = serde_json::from_str(&format!(
            r#"{{"id":"{}","title":"t","created_at":"2024-01-01T00:00:00Z"}}"#,
            Uuid::nil()
        ))
        .unwrap();
        assert_eq!(t.author_id, None);
        assert_eq!(t.like_count, 0);
        assert!(t.liked_by.is_empty());
    }
}
