use std::{
    collections::{btree_map, BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use theoria_api::{
    validate_storage_path, AuthProvider, AuthToken, Comment, CommentId, Error, NewComment,
    NewSession, NewTheory, NewUser, ObjectStorage, ProfileUpdate, Store, Theory, TheoryId, Time,
    User, UserId, Uuid,
};
use tokio::sync::watch;

/// In-memory stand-in for the document store, the object storage and the
/// session handling of theoria-server
pub struct MockServer(Mutex<MockDb>);

#[derive(Debug)]
struct DbUser {
    name: String,
    pass_hash: String,
    sessions: HashMap<AuthToken, Device>,
    user: User,
}

#[derive(Debug)]
struct Device(String);

#[derive(Debug, Default)]
struct MockDb {
    users: BTreeMap<UserId, DbUser>,

    /// In insertion order
    theories: Vec<Theory>,
    comments: HashMap<TheoryId, Vec<Comment>>,
    objects: HashMap<String, Vec<u8>>,
    last_time: Option<Time>,

    offline: bool,
    read_only: bool,
    broken_lookups: HashSet<UserId>,
}

impl MockDb {
    /// Strictly increasing, so that ordering by date is deterministic in tests
    fn now(&mut self) -> Time {
        let mut now = Utc::now();
        if let Some(last) = self.last_time {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_time = Some(now);
        now
    }

    fn check_read(&self) -> anyhow::Result<()> {
        if self.offline {
            return Err(anyhow!("mock server is offline"));
        }
        Ok(())
    }

    fn check_write(&self) -> anyhow::Result<()> {
        self.check_read()?;
        if self.read_only {
            return Err(anyhow!("mock server rejects writes"));
        }
        Ok(())
    }

    fn theory_mut(&mut self, id: TheoryId) -> Result<&mut Theory, Error> {
        self.theories
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(Error::NotFound)
    }

    fn resolve(&self, tok: AuthToken) -> Result<&DbUser, Error> {
        self.users
            .values()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::PermissionDenied)
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer(Mutex::new(MockDb::default()))
    }

    fn db(&self) -> MutexGuard<'_, MockDb> {
        self.0.lock().expect("mock server mutex poisoned")
    }

    /// Adds a user that cannot log in, returning its id
    pub fn test_add_user(&self, display_name: &str) -> UserId {
        let id = UserId(Uuid::new_v4());
        self.test_put_user(User::new(id, String::from(display_name)));
        id
    }

    /// Inserts or replaces the document of a user
    pub fn test_put_user(&self, user: User) {
        let mut db = self.db();
        match db.users.entry(user.id) {
            btree_map::Entry::Occupied(mut o) => o.get_mut().user = user,
            btree_map::Entry::Vacant(v) => {
                v.insert(DbUser {
                    name: user.id.to_string(),
                    pass_hash: String::new(),
                    sessions: HashMap::new(),
                    user,
                });
            }
        }
    }

    /// Removes a user document, leaving everything that references it in place
    pub fn test_remove_user(&self, id: UserId) {
        self.db().users.remove(&id);
    }

    /// Inserts a theory as-is, bypassing validation and id assignment
    pub fn test_insert_theory(&self, t: Theory) {
        self.db().theories.push(t);
    }

    pub fn test_theory(&self, id: TheoryId) -> Option<Theory> {
        self.db().theories.iter().find(|t| t.id == id).cloned()
    }

    pub fn test_comments(&self, id: TheoryId) -> Vec<Comment> {
        self.db().comments.get(&id).cloned().unwrap_or_default()
    }

    pub fn test_object(&self, path: &str) -> Option<Vec<u8>> {
        self.db().objects.get(path).cloned()
    }

    /// Makes every call fail
    pub fn test_set_offline(&self, offline: bool) {
        self.db().offline = offline;
    }

    /// Makes every write fail, reads still succeed
    pub fn test_set_read_only(&self, read_only: bool) {
        self.db().read_only = read_only;
    }

    /// Makes lookups of this specific user fail with an I/O-like error
    pub fn test_break_lookup(&self, id: UserId) {
        self.db().broken_lookups.insert(id);
    }

    pub fn admin_create_user(&self, u: NewUser) -> Result<(), Error> {
        u.validate()?;
        let mut db = self.db();

        if db.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match db.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbUser {
                    name: u.name,
                    pass_hash: u.initial_password_hash,
                    sessions: HashMap::new(),
                    user: User::new(u.id, u.display_name),
                });
                Ok(())
            }
        }
    }

    pub fn auth(&self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let mut db = self.db();
        for u in db.users.values_mut() {
            if u.name == s.user {
                if !bcrypt::verify(&s.password, &u.pass_hash).unwrap_or(false) {
                    return Err(Error::PermissionDenied);
                }
                let tok = AuthToken(Uuid::new_v4());
                u.sessions.insert(tok, Device(s.device));
                return Ok(tok);
            }
        }
        Err(Error::PermissionDenied)
    }

    pub fn unauth(&self, tok: AuthToken) -> Result<(), Error> {
        let mut db = self.db();
        let owner = db.resolve(tok)?.user.id;
        if let Some(u) = db.users.get_mut(&owner) {
            u.sessions.remove(&tok);
        }
        Ok(())
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        Ok(self.db().resolve(tok)?.user.id)
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[async_trait]
impl Store for MockServer {
    async fn get_user(&self, id: UserId) -> anyhow::Result<Option<User>> {
        let db = self.db();
        db.check_read()?;
        if db.broken_lookups.contains(&id) {
            return Err(anyhow!("lookup of user {id} failed"));
        }
        Ok(db.users.get(&id).map(|u| u.user.clone()))
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let db = self.db();
        db.check_read()?;
        Ok(db.users.values().map(|u| u.user.clone()).collect())
    }

    async fn list_theories(&self) -> anyhow::Result<Vec<Theory>> {
        let db = self.db();
        db.check_read()?;
        let mut res = db.theories.clone();
        res.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(res)
    }

    async fn get_theory(&self, id: TheoryId) -> anyhow::Result<Option<Theory>> {
        let db = self.db();
        db.check_read()?;
        Ok(db.theories.iter().find(|t| t.id == id).cloned())
    }

    async fn add_theory(&self, t: NewTheory) -> anyhow::Result<Theory> {
        t.validate()?;
        let mut db = self.db();
        db.check_write()?;
        let theory = Theory {
            id: TheoryId(Uuid::new_v4()),
            author_id: Some(t.author_id),
            title: t.title,
            description: t.description,
            media_url: t.media_url,
            created_at: db.now(),
            like_count: 0,
            liked_by: Default::default(),
        };
        db.theories.push(theory.clone());
        Ok(theory)
    }

    async fn list_comments(&self, theory: TheoryId) -> anyhow::Result<Vec<Comment>> {
        let db = self.db();
        db.check_read()?;
        let mut res = db.comments.get(&theory).cloned().unwrap_or_default();
        res.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(res)
    }

    async fn add_comment(&self, c: NewComment) -> anyhow::Result<Comment> {
        c.validate()?;
        let mut db = self.db();
        db.check_write()?;
        db.theory_mut(c.theory_id)?;
        let comment = Comment {
            id: CommentId(Uuid::new_v4()),
            theory_id: c.theory_id,
            author_id: c.author_id,
            text: c.text,
            created_at: db.now(),
        };
        db.comments
            .entry(c.theory_id)
            .or_default()
            .push(comment.clone());
        Ok(comment)
    }

    async fn set_like(
        &self,
        theory: TheoryId,
        user: UserId,
        liked: bool,
    ) -> anyhow::Result<Theory> {
        let mut db = self.db();
        db.check_write()?;
        let t = db.theory_mut(theory)?;
        t.set_liked(user, liked);
        Ok(t.clone())
    }

    async fn update_profile(&self, user: UserId, update: ProfileUpdate) -> anyhow::Result<User> {
        update.validate()?;
        let mut db = self.db();
        db.check_write()?;
        let u = &mut db.users.get_mut(&user).ok_or(Error::NotFound)?.user;
        update.apply_to(u);
        Ok(u.clone())
    }
}

#[async_trait]
impl ObjectStorage for MockServer {
    async fn upload(&self, path: &str, data: Vec<u8>) -> anyhow::Result<()> {
        validate_storage_path(path)?;
        let mut db = self.db();
        db.check_write()?;
        db.objects.insert(String::from(path), data);
        Ok(())
    }

    async fn download_url(&self, path: &str) -> anyhow::Result<String> {
        validate_storage_path(path)?;
        let db = self.db();
        db.check_read()?;
        if !db.objects.contains_key(path) {
            return Err(Error::NotFound.into());
        }
        Ok(format!("mock://{path}"))
    }
}

/// Auth provider whose state is driven by the test
pub struct MockAuth {
    state: watch::Sender<Option<UserId>>,
    failing: AtomicBool,
}

impl MockAuth {
    pub fn new() -> MockAuth {
        MockAuth {
            state: watch::channel(None).0,
            failing: AtomicBool::new(false),
        }
    }

    pub fn sign_in(&self, user: UserId) {
        tracing::debug!(?user, "mock sign-in");
        self.state.send_replace(Some(user));
    }

    /// Makes `sign_out` fail without changing the signed-in user
    pub fn test_set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for MockAuth {
    fn default() -> MockAuth {
        MockAuth::new()
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    fn current_user(&self) -> Option<UserId> {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("mock auth provider refused to sign out"));
        }
        self.state.send_replace(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_theory(author: UserId, title: &str) -> NewTheory {
        NewTheory {
            author_id: author,
            title: String::from(title),
            description: String::new(),
            media_url: None,
        }
    }

    #[tokio::test]
    async fn theories_and_comments_come_newest_first() {
        let srv = MockServer::new();
        let u = srv.test_add_user("Ada");
        let first = srv.add_theory(new_theory(u, "first")).await.unwrap();
        let second = srv.add_theory(new_theory(u, "second")).await.unwrap();
        let listed = srv.list_theories().await.unwrap();
        assert_eq!(
            listed.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        for text in ["a", "b", "c"] {
            srv.add_comment(NewComment {
                theory_id: first.id,
                author_id: u,
                text: String::from(text),
            })
            .await
            .unwrap();
        }
        let texts = srv
            .list_comments(first.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["c", "b", "a"]);
        assert!(srv.list_comments(second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn comment_on_missing_theory_fails() {
        let srv = MockServer::new();
        let u = srv.test_add_user("Ada");
        let err = srv
            .add_comment(NewComment {
                theory_id: TheoryId(Uuid::new_v4()),
                author_id: u,
                text: String::from("hello"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::NotFound));
    }

    #[tokio::test]
    async fn concurrent_likes_are_all_counted() {
        let srv = MockServer::new();
        let author = srv.test_add_user("Ada");
        let t = srv.add_theory(new_theory(author, "t")).await.unwrap();
        let likers = (0..20).map(|_| UserId(Uuid::new_v4())).collect::<Vec<_>>();
        futures::future::join_all(likers.iter().map(|u| srv.set_like(t.id, *u, true))).await;
        let t = srv.get_theory(t.id).await.unwrap().unwrap();
        assert_eq!(t.like_count, 20);
        assert_eq!(t.liked_by.len(), 20);
    }

    #[tokio::test]
    async fn login_flow() {
        let srv = MockServer::new();
        let id = UserId(Uuid::new_v4());
        srv.admin_create_user(NewUser {
            id,
            name: String::from("ada"),
            display_name: String::from("Ada"),
            initial_password_hash: bcrypt::hash("secret", 4).unwrap(),
        })
        .unwrap();
        let session = |password: &str| NewSession {
            user: String::from("ada"),
            password: String::from(password),
            device: String::from("test"),
        };
        assert_eq!(srv.auth(session("wrong")), Err(Error::PermissionDenied));
        let tok = srv.auth(session("secret")).unwrap();
        assert_eq!(srv.whoami(tok), Ok(id));
        srv.unauth(tok).unwrap();
        assert_eq!(srv.whoami(tok), Err(Error::PermissionDenied));
    }

    #[tokio::test]
    async fn download_url_requires_an_upload() {
        let srv = MockServer::new();
        assert!(srv.download_url("profilePics/x").await.is_err());
        srv.upload("profilePics/x", vec![1, 2, 3]).await.unwrap();
        assert_eq!(
            srv.download_url("profilePics/x").await.unwrap(),
            "mock://profilePics/x"
        );
        assert!(srv.upload("../x", vec![]).await.is_err());
    }
}
