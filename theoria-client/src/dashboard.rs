use anyhow::Context;

use crate::{
    api::{profile_picture_path, ObjectStorage, ProfileUpdate, Store, Theory, User, UserId},
    AuthorView,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UserStats {
    pub theories: usize,
    pub followers: u64,
    pub following: u64,
}

/// Profile page of the signed-in user
#[derive(Clone, Debug)]
pub struct Dashboard {
    user: UserId,
    profile: Option<User>,

    /// Theories authored by the user, newest first
    activities: Vec<Theory>,

    bio_draft: String,
    pending_picture: Option<Vec<u8>>,
}

impl Dashboard {
    pub async fn load<S>(store: &S, user: UserId) -> Dashboard
    where
        S: ?Sized + Store,
    {
        let profile = match store.get_user(user).await {
            Ok(Some(u)) => Some(u),
            Ok(None) => {
                tracing::warn!(%user, "no user document for the signed-in user");
                None
            }
            Err(err) => {
                tracing::error!(?err, %user, "error fetching user data");
                None
            }
        };
        let activities = match store.list_theories().await {
            Ok(theories) => theories
                .into_iter()
                .filter(|t| t.author_id == Some(user))
                .collect(),
            Err(err) => {
                tracing::error!(?err, %user, "error fetching activities");
                Vec::new()
            }
        };
        let bio_draft = profile
            .as_ref()
            .and_then(|p| p.bio.clone())
            .unwrap_or_default();
        Dashboard {
            user,
            profile,
            activities,
            bio_draft,
            pending_picture: None,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn author(&self) -> AuthorView {
        match &self.profile {
            Some(p) => AuthorView::of(p),
            None => AuthorView::sentinel(Some(self.user)),
        }
    }

    pub fn bio(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|p| p.bio.as_deref())
            .unwrap_or("")
    }

    pub fn activities(&self) -> &[Theory] {
        &self.activities
    }

    pub fn stats(&self) -> UserStats {
        UserStats {
            theories: self.activities.len(),
            followers: self.profile.as_ref().map_or(0, |p| p.followers_count),
            following: self.profile.as_ref().map_or(0, |p| p.following_count),
        }
    }

    pub fn bio_draft(&self) -> &str {
        &self.bio_draft
    }

    pub fn set_bio(&mut self, bio: String) {
        self.bio_draft = bio;
    }

    pub fn pending_picture(&self) -> Option<&[u8]> {
        self.pending_picture.as_deref()
    }

    pub fn set_picture(&mut self, picture: Option<Vec<u8>>) {
        self.pending_picture = picture;
    }

    /// Submits the bio draft and the pending picture
    pub async fn submit<S, O>(&mut self, store: &S, storage: &O) -> anyhow::Result<()>
    where
        S: ?Sized + Store,
        O: ?Sized + ObjectStorage,
    {
        let bio = self.bio_draft.clone();
        let picture = self.pending_picture.clone();
        self.update_profile(store, storage, bio, picture).await
    }

    /// Uploads `picture` if any, then writes the profile.
    ///
    /// On error nothing local changes, though the picture may already have
    /// been uploaded.
    pub async fn update_profile<S, O>(
        &mut self,
        store: &S,
        storage: &O,
        bio: String,
        picture: Option<Vec<u8>>,
    ) -> anyhow::Result<()>
    where
        S: ?Sized + Store,
        O: ?Sized + ObjectStorage,
    {
        let photo_url = match picture {
            None => None,
            Some(data) => {
                let path = profile_picture_path(self.user);
                storage
                    .upload(&path, data)
                    .await
                    .with_context(|| format!("uploading profile picture to {path:?}"))?;
                let url = storage
                    .download_url(&path)
                    .await
                    .with_context(|| format!("resolving url of {path:?}"))?;
                Some(url)
            }
        };
        let updated = store
            .update_profile(self.user, ProfileUpdate { bio, photo_url })
            .await
            .with_context(|| format!("updating profile of {}", self.user))?;
        tracing::info!(user = %self.user, "profile updated");
        self.profile = Some(updated);
        self.pending_picture = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use theoria_mock_server::MockServer;

    use super::*;
    use crate::{
        api::{NewTheory, TheoryId, Uuid},
        DEFAULT_AVATAR, SENTINEL_NAME,
    };

    async fn post(srv: &MockServer, author: UserId, title: &str) {
        srv.add_theory(NewTheory {
            author_id: author,
            title: String::from(title),
            description: String::new(),
            media_url: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn stats_count_own_theories() {
        let srv = MockServer::new();
        let me = srv.test_add_user("Ada");
        let other = srv.test_add_user("Bob");
        let mut u = srv.get_user(me).await.unwrap().unwrap();
        u.followers_count = 12;
        u.following_count = 3;
        u.bio = Some(String::from("I ask questions"));
        srv.test_put_user(u);
        post(&srv, me, "first").await;
        post(&srv, other, "not mine").await;
        post(&srv, me, "second").await;

        let d = Dashboard::load(&srv, me).await;
        assert_eq!(
            d.stats(),
            UserStats {
                theories: 2,
                followers: 12,
                following: 3,
            }
        );
        let titles = d
            .activities()
            .iter()
            .map(|t| t.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["second", "first"]);
        assert_eq!(d.bio(), "I ask questions");
        assert_eq!(d.bio_draft(), "I ask questions");
        assert_eq!(d.author().display_name, "Ada");
    }

    #[tokio::test]
    async fn missing_profile_shows_sentinel() {
        let srv = MockServer::new();
        let me = UserId(Uuid::new_v4());
        srv.test_insert_theory(Theory {
            id: TheoryId(Uuid::new_v4()),
            author_id: Some(me),
            title: String::from("orphaned"),
            description: String::new(),
            media_url: None,
            created_at: Utc::now(),
            like_count: 0,
            liked_by: Default::default(),
        });
        let d = Dashboard::load(&srv, me).await;
        assert_eq!(d.author().display_name, SENTINEL_NAME);
        assert_eq!(d.author().photo_url, DEFAULT_AVATAR);
        assert_eq!(d.bio(), "");
        assert_eq!(
            d.stats(),
            UserStats {
                theories: 1,
                followers: 0,
                following: 0,
            }
        );
    }

    #[tokio::test]
    async fn offline_store_yields_empty_dashboard() {
        let srv = MockServer::new();
        let me = srv.test_add_user("Ada");
        post(&srv, me, "first").await;
        srv.test_set_offline(true);
        let d = Dashboard::load(&srv, me).await;
        assert_eq!(d.stats(), UserStats::default());
        assert_eq!(d.author(), crate::AuthorView::sentinel(Some(me)));
    }

    #[tokio::test]
    async fn picture_is_uploaded_under_the_user() {
        let srv = MockServer::new();
        let me = srv.test_add_user("Ada");
        let mut d = Dashboard::load(&srv, me).await;
        d.set_bio(String::from("new bio"));
        d.set_picture(Some(vec![0x89, b'P', b'N', b'G']));
        d.submit(&srv, &srv).await.unwrap();

        let path = format!("profilePics/{me}");
        assert_eq!(srv.test_object(&path), Some(vec![0x89, b'P', b'N', b'G']));
        let expected_url = format!("mock://{path}");
        let stored = srv.get_user(me).await.unwrap().unwrap();
        assert_eq!(stored.photo_url.as_deref(), Some(expected_url.as_str()));
        assert_eq!(stored.bio.as_deref(), Some("new bio"));
        assert_eq!(d.author().photo_url, expected_url);
        assert_eq!(d.bio(), "new bio");
        assert_eq!(d.pending_picture(), None);
    }

    #[tokio::test]
    async fn bio_only_update_keeps_the_picture() {
        let srv = MockServer::new();
        let me = srv.test_add_user("Ada");
        let mut u = srv.get_user(me).await.unwrap().unwrap();
        u.photo_url = Some(String::from("https://example.org/ada.png"));
        srv.test_put_user(u);

        let mut d = Dashboard::load(&srv, me).await;
        d.update_profile(&srv, &srv, String::from("hi"), None)
            .await
            .unwrap();
        assert_eq!(d.author().photo_url, "https://example.org/ada.png");
        assert_eq!(
            srv.get_user(me).await.unwrap().unwrap().photo_url.as_deref(),
            Some("https://example.org/ada.png")
        );
        assert_eq!(d.bio(), "hi");
    }

    #[tokio::test]
    async fn failed_update_changes_nothing_locally() {
        let srv = MockServer::new();
        let me = srv.test_add_user("Ada");
        let mut d = Dashboard::load(&srv, me).await;
        d.set_picture(Some(vec![1, 2, 3]));
        srv.test_set_read_only(true);
        assert!(d
            .update_profile(&srv, &srv, String::from("hi"), Some(vec![1, 2, 3]))
            .await
            .is_err());
        assert_eq!(d.bio(), "");
        assert_eq!(d.pending_picture(), Some(&[1, 2, 3][..]));
        assert_eq!(srv.test_object(&format!("profilePics/{me}")), None);
    }
}
