use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use theoria_api::{
    profile_picture_path, AuthToken, Error as ApiError, Comment, LikeRequest, NewComment, NewSession, NewTheory,
    NewUser, ObjectStorage, ProfileUpdate, Theory, TheoryId, User, UserId, Uuid,
};

use crate::{
    db,
    extractors::*,
    storage::{FsStorage, UPLOAD_TMP_SUFFIX},
    Error,
};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<Json<()>, Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await?;
    Ok(Json(()))
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or(Error::permission_denied())?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<Json<()>, Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(Json(())),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

pub async fn fetch_users(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(
        db::fetch_users(&mut *conn)
            .await
            .with_context(|| format!("fetching user list for {user}"))?,
    ))
}

pub async fn fetch_user(
    Auth(_): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<User>>, Error> {
    Ok(Json(db::fetch_user(&mut *conn, UserId(id)).await?))
}

pub async fn update_profile(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>, Error> {
    update.validate()?;
    Ok(Json(db::update_profile(&mut *conn, user, &update).await?))
}

pub async fn fetch_theories(
    Auth(user): Auth,
    mut conn: PgConn,
) -> Result<Json<Vec<Theory>>, Error> {
    Ok(Json(
        db::fetch_theories(&mut *conn)
            .await
            .with_context(|| format!("fetching theory list for {user}"))?,
    ))
}

pub async fn fetch_theory(
    Auth(_): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<Theory>>, Error> {
    Ok(Json(db::fetch_theory(&mut *conn, TheoryId(id)).await?))
}

pub async fn create_theory(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(t): Json<NewTheory>,
) -> Result<Json<Theory>, Error> {
    if t.author_id != user {
        return Err(Error::permission_denied());
    }
    t.validate()?;
    Ok(Json(db::create_theory(&mut *conn, &t).await?))
}

pub async fn fetch_comments(
    Auth(_): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(db::fetch_comments(&mut *conn, TheoryId(id)).await?))
}

pub async fn create_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
    Json(c): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    if c.author_id != user || c.theory_id != TheoryId(id) {
        return Err(Error::permission_denied());
    }
    c.validate()?;
    Ok(Json(db::create_comment(&mut *conn, &c).await?))
}

pub async fn set_like(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
    Json(req): Json<LikeRequest>,
) -> Result<Json<Theory>, Error> {
    if req.user_id != user {
        return Err(Error::permission_denied());
    }
    Ok(Json(
        db::set_like(&mut *conn, TheoryId(id), user, req.liked).await?,
    ))
}

/// Users may only write their own profile picture, and never the
/// `profilePics` directory itself
fn check_writable(user: UserId, path: &str) -> Result<(), Error> {
    if path.ends_with(UPLOAD_TMP_SUFFIX) {
        return Err(ApiError::InvalidPath(String::from(path)).into());
    }
    let first = path.split('/').next().unwrap_or(path);
    if first == "profilePics" && path != profile_picture_path(user) {
        return Err(Error::permission_denied());
    }
    Ok(())
}

pub async fn upload(
    Auth(user): Auth,
    State(storage): State<FsStorage>,
    Path(path): Path<String>,
    data: Bytes,
) -> Result<Json<()>, Error> {
    let path = path.trim_start_matches('/');
    check_writable(user, path)?;
    storage.upload(path, data.to_vec()).await?;
    Ok(Json(()))
}

pub async fn download_url(
    Auth(_): Auth,
    State(storage): State<FsStorage>,
    Path(path): Path<String>,
) -> Result<Json<String>, Error> {
    Ok(Json(
        storage.download_url(path.trim_start_matches('/')).await?,
    ))
}

pub async fn download(
    State(storage): State<FsStorage>,
    Path(path): Path<String>,
) -> Result<Vec<u8>, Error> {
    storage
        .read(path.trim_start_matches('/'))
        .await?
        .ok_or_else(Error::not_found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_own_profile_picture_is_writable() {
        let me = UserId(Uuid::new_v4());
        let other = UserId(Uuid::new_v4());
        assert!(check_writable(me, &profile_picture_path(me)).is_ok());
        assert!(check_writable(me, &profile_picture_path(other)).is_err());
        assert!(check_writable(me, &format!("{}/nested", profile_picture_path(me))).is_err());
        assert!(check_writable(me, "media/theory.png").is_ok());
        assert!(check_writable(me, "profilePics").is_err());
        assert!(check_writable(me, "profilePics/").is_err());
        assert!(check_writable(me, &format!("profilePics/{}", me.0.simple())).is_err());
        let tmp = format!("{}{UPLOAD_TMP_SUFFIX}", profile_picture_path(me));
        assert!(check_writable(me, &tmp).is_err());
        assert!(check_writable(me, "media/theory.png.upload-tmp").is_err());
    }

    #[tokio::test]
    async fn bare_profile_pictures_directory_stays_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().to_path_buf(), String::new());
        let mallory = UserId(Uuid::new_v4());
        let ada = UserId(Uuid::new_v4());
        assert!(check_writable(mallory, "profilePics").is_err());
        check_writable(ada, &profile_picture_path(ada)).unwrap();
        storage
            .upload(&profile_picture_path(ada), vec![1])
            .await
            .unwrap();
        assert!(dir.path().join("profilePics").is_dir());
    }
}
