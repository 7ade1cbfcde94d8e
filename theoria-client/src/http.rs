use anyhow::{anyhow, Context};
use tokio::sync::watch;

use crate::api::{
    self, validate_storage_path, AuthProvider, AuthToken, Comment, LikeRequest, NewComment,
    NewSession, NewTheory, ObjectStorage, ProfileUpdate, Store, Theory, TheoryId, User, UserId,
};

lazy_static::lazy_static! {
    static ref CLIENT: reqwest::Client = reqwest::Client::new();
}

/// Talks to a theoria-server on behalf of one signed-in user
pub struct HttpStore {
    host: String,
    token: AuthToken,
    user: watch::Sender<Option<UserId>>,
}

/// Turns non-success responses into the api error they carry
async fn parse_response<R>(resp: reqwest::Response) -> anyhow::Result<R>
where
    R: for<'de> serde::Deserialize<'de>,
{
    let status = resp.status();
    if !status.is_success() {
        let body = resp.bytes().await.context("reading error response")?;
        return Err(match api::Error::parse(&body) {
            Ok(err) => err.into(),
            Err(_) => anyhow!("server answered with status {}", status),
        });
    }
    resp.json().await.context("parsing server response")
}

impl HttpStore {
    pub async fn login(host: String, session: NewSession) -> anyhow::Result<HttpStore> {
        session.validate()?;
        let host = String::from(host.trim_end_matches('/'));
        let resp = CLIENT
            .post(format!("{}/api/auth", host))
            .json(&session)
            .send()
            .await
            .with_context(|| format!("connecting to {}", host))?;
        let token: AuthToken = parse_response(resp).await.context("signing in")?;
        let user: UserId = parse_response(
            CLIENT
                .get(format!("{}/api/whoami", host))
                .bearer_auth(token.0)
                .send()
                .await
                .context("sending whoami request")?,
        )
        .await
        .context("retrieving signed-in user")?;
        tracing::info!(%user, %host, "signed in");
        Ok(HttpStore {
            host,
            token,
            user: watch::channel(Some(user)).0,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn token(&self) -> AuthToken {
        self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host, path)
    }

    async fn get<R>(&self, path: &str) -> anyhow::Result<R>
    where
        R: for<'de> serde::Deserialize<'de>,
    {
        let resp = CLIENT
            .get(self.url(path))
            .bearer_auth(self.token.0)
            .send()
            .await
            .with_context(|| format!("sending GET /api/{}", path))?;
        parse_response(resp).await
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> anyhow::Result<R>
    where
        B: serde::Serialize,
        R: for<'de> serde::Deserialize<'de>,
    {
        let resp = CLIENT
            .post(self.url(path))
            .bearer_auth(self.token.0)
            .json(body)
            .send()
            .await
            .with_context(|| format!("sending POST /api/{}", path))?;
        parse_response(resp).await
    }
}

#[async_trait::async_trait]
impl Store for HttpStore {
    async fn get_user(&self, id: UserId) -> anyhow::Result<Option<User>> {
        self.get(&format!("users/{}", id)).await
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        self.get("users").await
    }

    async fn list_theories(&self) -> anyhow::Result<Vec<Theory>> {
        self.get("theories").await
    }

    async fn get_theory(&self, id: TheoryId) -> anyhow::Result<Option<Theory>> {
        self.get(&format!("theories/{}", id)).await
    }

    async fn add_theory(&self, t: NewTheory) -> anyhow::Result<Theory> {
        self.post("theories", &t).await
    }

    async fn list_comments(&self, theory: TheoryId) -> anyhow::Result<Vec<Comment>> {
        self.get(&format!("theories/{}/comments", theory)).await
    }

    async fn add_comment(&self, c: NewComment) -> anyhow::Result<Comment> {
        self.post(&format!("theories/{}/comments", c.theory_id), &c)
            .await
    }

    async fn set_like(
        &self,
        theory: TheoryId,
        user: UserId,
        liked: bool,
    ) -> anyhow::Result<Theory> {
        self.post(
            &format!("theories/{}/like", theory),
            &LikeRequest {
                user_id: user,
                liked,
            },
        )
        .await
    }

    async fn update_profile(&self, user: UserId, update: ProfileUpdate) -> anyhow::Result<User> {
        if self.current_user() != Some(user) {
            return Err(api::Error::PermissionDenied.into());
        }
        self.post("profile", &update).await
    }
}

#[async_trait::async_trait]
impl ObjectStorage for HttpStore {
    async fn upload(&self, path: &str, data: Vec<u8>) -> anyhow::Result<()> {
        validate_storage_path(path)?;
        let resp = CLIENT
            .put(self.url(&format!("storage/{}", path)))
            .bearer_auth(self.token.0)
            .body(data)
            .send()
            .await
            .with_context(|| format!("uploading {:?}", path))?;
        parse_response(resp).await
    }

    async fn download_url(&self, path: &str) -> anyhow::Result<String> {
        validate_storage_path(path)?;
        self.get(&format!("storage/{}", path)).await
    }
}

#[async_trait::async_trait]
impl AuthProvider for HttpStore {
    fn current_user(&self) -> Option<UserId> {
        *self.user.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.user.subscribe()
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        if self.current_user().is_none() {
            return Ok(());
        }
        let resp = CLIENT
            .post(self.url("unauth"))
            .bearer_auth(self.token.0)
            .send()
            .await
            .context("sending sign-out request")?;
        parse_response::<()>(resp).await.context("signing out")?;
        self.user.send_replace(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpStore {
        HttpStore {
            host: String::from("http://localhost:8000"),
            token: AuthToken::stub(),
            user: watch::channel(Some(UserId::stub())).0,
        }
    }

    #[test]
    fn urls() {
        assert_eq!(store().url("theories"), "http://localhost:8000/api/theories");
    }

    #[tokio::test]
    async fn invalid_paths_never_leave_the_client() {
        let s = store();
        let err = s.upload("../etc/passwd", vec![]).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<api::Error>(),
            Some(&api::Error::InvalidPath(String::from("../etc/passwd")))
        );
        assert!(s.download_url("a//b").await.is_err());
    }

    #[tokio::test]
    async fn profile_of_someone_else_is_refused() {
        let s = store();
        let err = s
            .update_profile(UserId(api::Uuid::new_v4()), ProfileUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<api::Error>(),
            Some(&api::Error::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn signed_out_store_signs_out_locally() {
        let s = store();
        let mut changes = s.subscribe();
        s.user.send_replace(None);
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), None);
        s.sign_out().await.unwrap();
        assert_eq!(s.current_user(), None);
    }
}
