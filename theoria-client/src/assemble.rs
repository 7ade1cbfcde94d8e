use std::collections::{HashMap, HashSet};

use futures::future;

use crate::{
    api::{Comment, Store, Theory, User, UserId},
    AuthorView, CommentView, TheoryView,
};

/// Result of user lookups: `None` records a user that is missing or whose
/// lookup failed, so that it is not looked up again
pub type UserCache = HashMap<UserId, Option<User>>;

/// Looks up every user in `ids` that is not in `cache` yet, each at most once.
///
/// Lookup failures are logged and recorded as missing users.
pub async fn resolve_users<S>(store: &S, ids: impl IntoIterator<Item = UserId>, cache: &mut UserCache)
where
    S: ?Sized + Store,
{
    let missing = ids
        .into_iter()
        .filter(|id| !cache.contains_key(id))
        .collect::<HashSet<_>>();
    let fetched = future::join_all(missing.into_iter().map(|id| async move {
        match store.get_user(id).await {
            Ok(Some(u)) => (id, Some(u)),
            Ok(None) => {
                tracing::warn!(user = %id, "no user found for id");
                (id, None)
            }
            Err(err) => {
                tracing::error!(?err, user = %id, "error fetching user data");
                (id, None)
            }
        }
    }))
    .await;
    cache.extend(fetched);
}

/// Display identity for an author reference, with sentinel fallback for
/// absent references and for users missing from `cache`
pub fn author_view(author: Option<UserId>, cache: &UserCache) -> AuthorView {
    match author.and_then(|id| cache.get(&id)) {
        Some(Some(u)) => AuthorView::of(u),
        _ => AuthorView::sentinel(author),
    }
}

/// Joins `theories` with their authors and comments, newest first.
///
/// Never fails: comment listings that fail are logged and shown as empty,
/// and authors that cannot be resolved get the sentinel identity.
pub async fn assemble<S>(store: &S, theories: Vec<Theory>, cache: &mut UserCache) -> Vec<TheoryView>
where
    S: ?Sized + Store,
{
    let comments: Vec<Vec<Comment>> = future::join_all(theories.iter().map(|t| async move {
        match store.list_comments(t.id).await {
            Ok(c) => c,
            Err(err) => {
                tracing::error!(?err, theory = %t.id, "error fetching comments");
                Vec::new()
            }
        }
    }))
    .await;

    for t in theories.iter().filter(|t| t.author_id.is_none()) {
        tracing::warn!(theory = %t.id, "no author associated with theory");
    }
    let referenced = theories
        .iter()
        .filter_map(|t| t.author_id)
        .chain(comments.iter().flatten().map(|c| c.author_id))
        .collect::<Vec<_>>();
    resolve_users(store, referenced, cache).await;

    let mut res = theories
        .into_iter()
        .zip(comments)
        .map(|(theory, comments)| {
            let mut comments = comments
                .into_iter()
                .map(|comment| CommentView {
                    author: author_view(Some(comment.author_id), cache),
                    comment,
                })
                .collect::<Vec<_>>();
            comments.sort_by(|a, b| b.comment.created_at.cmp(&a.comment.created_at));
            TheoryView {
                author: author_view(theory.author_id, cache),
                theory,
                comments,
            }
        })
        .collect::<Vec<_>>();
    // stable, so that ties keep the store's order
    res.sort_by(|a, b| b.theory.created_at.cmp(&a.theory.created_at));
    res
}

/// Fetches and assembles the whole feed; a failed listing yields an empty feed
pub async fn fetch_feed<S>(store: &S, cache: &mut UserCache) -> Vec<TheoryView>
where
    S: ?Sized + Store,
{
    match store.list_theories().await {
        Ok(theories) => assemble(store, theories, cache).await,
        Err(err) => {
            tracing::error!(?err, "error fetching theories");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use theoria_mock_server::MockServer;

    use super::*;
    use crate::{
        api::{NewComment, TheoryId, Uuid},
        DEFAULT_AVATAR, SENTINEL_NAME,
    };

    fn theory(author: Option<UserId>, title: &str, age_minutes: i64) -> Theory {
        Theory {
            id: TheoryId(Uuid::new_v4()),
            author_id: author,
            title: String::from(title),
            description: String::from("bear with me"),
            media_url: None,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            like_count: 0,
            liked_by: Default::default(),
        }
    }

    async fn feed(srv: &MockServer) -> Vec<TheoryView> {
        fetch_feed(srv, &mut UserCache::new()).await
    }

    #[tokio::test]
    async fn feed_is_newest_first_with_authors() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        let bob = srv.test_add_user("Bob");
        srv.test_insert_theory(theory(Some(ada), "middle", 10));
        srv.test_insert_theory(theory(Some(bob), "newest", 1));
        srv.test_insert_theory(theory(Some(ada), "oldest", 100));

        let f = feed(&srv).await;
        let summary = f
            .iter()
            .map(|v| (v.theory.title.as_str(), v.author.display_name.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![("newest", "Bob"), ("middle", "Ada"), ("oldest", "Ada")]
        );
    }

    #[tokio::test]
    async fn ties_keep_store_order() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        let mut a = theory(Some(ada), "a", 5);
        let mut b = theory(Some(ada), "b", 5);
        b.created_at = a.created_at;
        a.title = String::from("first inserted");
        b.title = String::from("second inserted");
        srv.test_insert_theory(a);
        srv.test_insert_theory(b);
        let titles = feed(&srv)
            .await
            .into_iter()
            .map(|v| v.theory.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["first inserted", "second inserted"]);
    }

    #[tokio::test]
    async fn deleted_author_gets_sentinel() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        let gone = srv.test_add_user("Gone");
        srv.test_insert_theory(theory(Some(ada), "fine", 1));
        srv.test_insert_theory(theory(Some(gone), "orphan", 2));
        srv.test_remove_user(gone);

        let f = feed(&srv).await;
        assert_eq!(f.len(), 2);
        assert_eq!(f[0].author.display_name, "Ada");
        assert_eq!(f[1].theory.title, "orphan");
        assert_eq!(f[1].author, AuthorView::sentinel(Some(gone)));
        assert_eq!(f[1].author.display_name, SENTINEL_NAME);
        assert_eq!(f[1].author.photo_url, DEFAULT_AVATAR);
    }

    #[tokio::test]
    async fn missing_author_reference_gets_sentinel() {
        let srv = MockServer::new();
        srv.test_insert_theory(theory(None, "anonymous", 1));
        let f = feed(&srv).await;
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].author, AuthorView::sentinel(None));
    }

    #[tokio::test]
    async fn failing_lookup_does_not_abort_assembly() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        let broken = srv.test_add_user("Broken");
        srv.test_break_lookup(broken);
        srv.test_insert_theory(theory(Some(broken), "unlucky", 1));
        srv.test_insert_theory(theory(Some(ada), "lucky", 2));

        let f = feed(&srv).await;
        assert_eq!(f.len(), 2);
        assert_eq!(f[0].author.display_name, SENTINEL_NAME);
        assert_eq!(f[1].author.display_name, "Ada");
    }

    #[tokio::test]
    async fn comments_resolve_their_own_authors() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        let bob = srv.test_add_user("Bob");
        let t = theory(Some(ada), "t", 1);
        let id = t.id;
        srv.test_insert_theory(t);
        for (author, text) in [(bob, "first"), (ada, "second"), (bob, "third")] {
            srv.add_comment(NewComment {
                theory_id: id,
                author_id: author,
                text: String::from(text),
            })
            .await
            .unwrap();
        }
        srv.test_remove_user(bob);

        let f = feed(&srv).await;
        let comments = f[0]
            .comments
            .iter()
            .map(|c| (c.comment.text.as_str(), c.author.display_name.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            comments,
            vec![("third", "User"), ("second", "Ada"), ("first", "User")]
        );
        assert_eq!(f[0].comment_count(), 3);
    }

    #[tokio::test]
    async fn offline_store_yields_empty_feed() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        srv.test_insert_theory(theory(Some(ada), "t", 1));
        srv.test_set_offline(true);
        assert!(feed(&srv).await.is_empty());
    }

    #[tokio::test]
    async fn cache_records_missing_users() {
        let srv = MockServer::new();
        let ada = srv.test_add_user("Ada");
        let ghost = UserId(Uuid::new_v4());
        let mut cache = UserCache::new();
        resolve_users(&srv, [ada, ghost, ada], &mut cache).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache[&ghost], None);
        assert_eq!(author_view(Some(ghost), &cache), AuthorView::sentinel(Some(ghost)));
        assert_eq!(author_view(Some(ada), &cache).display_name, "Ada");
    }
}
