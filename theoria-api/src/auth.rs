use uuid::Uuid;

use crate::{Error, UserId, STUB_UUID};

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub user: String,
    pub password: String,
    pub device: String,
}

impl NewSession {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.user)?;
        crate::validate_string(&self.password)?;
        crate::validate_string(&self.device)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

/// The session side of the auth collaborator: who is signed in, and a
/// notification whenever that changes
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    /// The receiver is marked as changed on every sign-in and sign-out
    fn subscribe(&self) -> tokio::sync::watch::Receiver<Option<UserId>>;

    async fn sign_out(&self) -> anyhow::Result<()>;
}
