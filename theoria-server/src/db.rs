use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Connection, Row};
use theoria_api::{
    AuthToken, Comment, CommentId, NewComment, NewSession, NewTheory, NewUser, ProfileUpdate,
    Theory, TheoryId, Time, User, UserId, Uuid,
};

use crate::Error;

const USER_FIELDS: &str =
    "id, display_name, photo_url, bio, followers_count, following_count";

/// Theories along with their likers, newest first
macro_rules! select_theories {
    ($filter:expr) => {
        concat!(
            "
                SELECT
                    t.id, t.author_id, t.title, t.description, t.media_url, t.created_at,
                    COALESCE(
                        array_agg(l.user_id) FILTER (WHERE l.user_id IS NOT NULL),
                        '{}'::uuid[]
                    ) AS liked_by
                FROM theories t
                LEFT JOIN theory_likes l
                    ON l.theory_id = t.id
            ",
            $filter,
            "
                GROUP BY t.id
                ORDER BY t.created_at DESC
            "
        )
    };
}

fn user_from_row(r: &PgRow) -> anyhow::Result<User> {
    let count = |field: &str| -> anyhow::Result<u64> {
        let c: i64 = r
            .try_get(field)
            .with_context(|| format!("retrieving the {field} field"))?;
        Ok(u64::try_from(c).unwrap_or(0))
    };
    Ok(User {
        id: UserId(r.try_get("id").context("retrieving the id field")?),
        display_name: r
            .try_get("display_name")
            .context("retrieving the display_name field")?,
        photo_url: r
            .try_get("photo_url")
            .context("retrieving the photo_url field")?,
        bio: r.try_get("bio").context("retrieving the bio field")?,
        followers_count: count("followers_count")?,
        following_count: count("following_count")?,
    })
}

fn theory_from_row(r: &PgRow) -> anyhow::Result<Theory> {
    let liked_by = r
        .try_get::<Vec<Uuid>, _>("liked_by")
        .context("retrieving the liked_by field")?
        .into_iter()
        .map(UserId)
        .collect::<std::collections::BTreeSet<_>>();
    Ok(Theory {
        id: TheoryId(r.try_get("id").context("retrieving the id field")?),
        author_id: r
            .try_get::<Option<Uuid>, _>("author_id")
            .context("retrieving the author_id field")?
            .map(UserId),
        title: r.try_get("title").context("retrieving the title field")?,
        description: r
            .try_get("description")
            .context("retrieving the description field")?,
        media_url: r
            .try_get("media_url")
            .context("retrieving the media_url field")?,
        created_at: r
            .try_get::<Time, _>("created_at")
            .context("retrieving the created_at field")?,
        like_count: liked_by.len() as u64,
        liked_by,
    })
}

fn comment_from_row(r: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(r.try_get("id").context("retrieving the id field")?),
        theory_id: TheoryId(
            r.try_get("theory_id")
                .context("retrieving the theory_id field")?,
        ),
        author_id: UserId(
            r.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        text: r.try_get("text").context("retrieving the text field")?,
        created_at: r
            .try_get::<Time, _>("created_at")
            .context("retrieving the created_at field")?,
    })
}

pub async fn create_user(conn: &mut sqlx::PgConnection, user: NewUser) -> Result<(), Error> {
    let conflicts = sqlx::query("SELECT id, name FROM users WHERE id = $1 OR name = $2")
        .bind(user.id.0)
        .bind(&user.name)
        .fetch_all(&mut *conn)
        .await
        .context("checking for conflicting users")?;
    for c in &conflicts {
        let name: String = c.try_get("name").context("retrieving the name field")?;
        if name == user.name {
            return Err(Error::name_already_used(name));
        }
    }
    if !conflicts.is_empty() {
        return Err(Error::uuid_already_used(user.id.0));
    }

    sqlx::query(
        "
            INSERT INTO users (id, name, password_hash, display_name)
            VALUES ($1, $2, $3, $4)
        ",
    )
    .bind(user.id.0)
    .bind(&user.name)
    .bind(&user.initial_password_hash)
    .bind(&user.display_name)
    .execute(conn)
    .await
    .with_context(|| format!("inserting user {:?}", user.name))?;
    tracing::info!(user = %user.id, name = ?user.name, "created user");
    Ok(())
}

/// Returns `None` if the name or password is wrong
pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    session: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let user = sqlx::query("SELECT id, password_hash FROM users WHERE name = $1")
        .bind(&session.user)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("fetching password hash for {:?}", session.user))?;
    let Some(user) = user else {
        return Ok(None);
    };
    let hash: String = user
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    if !bcrypt::verify(&session.password, &hash).unwrap_or(false) {
        return Ok(None);
    }

    let user_id: Uuid = user.try_get("id").context("retrieving the id field")?;
    let token = AuthToken(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query(
        "
            INSERT INTO sessions (id, user_id, device, login_time, last_active)
            VALUES ($1, $2, $3, $4, $4)
        ",
    )
    .bind(token.0)
    .bind(user_id)
    .bind(&session.device)
    .bind(now)
    .execute(conn)
    .await
    .with_context(|| format!("inserting new session for {:?}", session.user))?;
    Ok(Some(token))
}

/// Returns `false` if the session did not exist
pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let user = sqlx::query(
        "
            UPDATE sessions
            SET last_active = $1
            WHERE id = $2
            RETURNING user_id
        ",
    )
    .bind(Utc::now())
    .bind(token.0)
    .fetch_optional(conn)
    .await
    .context("recovering session")?
    .ok_or(Error::permission_denied())?;
    Ok(UserId(
        user.try_get("user_id")
            .context("retrieving the user_id field")?,
    ))
}

pub async fn fetch_users(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<User>> {
    let query = format!("SELECT {USER_FIELDS} FROM users ORDER BY display_name");
    let mut res = Vec::new();
    let mut rows = sqlx::query(&query).fetch(conn);
    while let Some(r) = rows.try_next().await.context("querying users table")? {
        res.push(user_from_row(&r)?);
    }
    Ok(res)
}

pub async fn fetch_user(
    conn: &mut sqlx::PgConnection,
    user: UserId,
) -> anyhow::Result<Option<User>> {
    sqlx::query(&format!("SELECT {USER_FIELDS} FROM users WHERE id = $1"))
        .bind(user.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching user {user}"))?
        .map(|r| user_from_row(&r))
        .transpose()
}

/// Leaves `photo_url` alone when the update carries none
pub async fn update_profile(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    update: &ProfileUpdate,
) -> Result<User, Error> {
    let row = sqlx::query(&format!(
        "
            UPDATE users
            SET bio = $2, photo_url = COALESCE($3, photo_url)
            WHERE id = $1
            RETURNING {USER_FIELDS}
        "
    ))
    .bind(user.0)
    .bind(&update.bio)
    .bind(&update.photo_url)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("updating profile of {user}"))?
    .ok_or(Error::not_found())?;
    Ok(user_from_row(&row)?)
}

pub async fn fetch_theories(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Theory>> {
    let mut res = Vec::new();
    let mut rows = sqlx::query(select_theories!("")).fetch(conn);
    while let Some(r) = rows.try_next().await.context("querying theories table")? {
        res.push(theory_from_row(&r)?);
    }
    Ok(res)
}

pub async fn fetch_theory(
    conn: &mut sqlx::PgConnection,
    theory: TheoryId,
) -> anyhow::Result<Option<Theory>> {
    sqlx::query(select_theories!("WHERE t.id = $1"))
        .bind(theory.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching theory {theory}"))?
        .map(|r| theory_from_row(&r))
        .transpose()
}

pub async fn create_theory(conn: &mut sqlx::PgConnection, t: &NewTheory) -> anyhow::Result<Theory> {
    let id = TheoryId(Uuid::new_v4());
    let created_at: Time = sqlx::query(
        "
            INSERT INTO theories (id, author_id, title, description, media_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING created_at
        ",
    )
    .bind(id.0)
    .bind(t.author_id.0)
    .bind(&t.title)
    .bind(&t.description)
    .bind(&t.media_url)
    .fetch_one(conn)
    .await
    .with_context(|| format!("inserting theory {:?}", t.title))?
    .try_get("created_at")
    .context("retrieving the created_at field")?;
    Ok(Theory {
        id,
        author_id: Some(t.author_id),
        title: t.title.clone(),
        description: t.description.clone(),
        media_url: t.media_url.clone(),
        created_at,
        like_count: 0,
        liked_by: Default::default(),
    })
}

async fn theory_exists(conn: &mut sqlx::PgConnection, theory: TheoryId) -> anyhow::Result<bool> {
    Ok(sqlx::query("SELECT 1 FROM theories WHERE id = $1")
        .bind(theory.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("checking theory {theory} exists"))?
        .is_some())
}

pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    theory: TheoryId,
) -> anyhow::Result<Vec<Comment>> {
    let mut res = Vec::new();
    let mut rows = sqlx::query(
        "
            SELECT id, theory_id, author_id, text, created_at
            FROM comments
            WHERE theory_id = $1
            ORDER BY created_at DESC
        ",
    )
    .bind(theory.0)
    .fetch(conn);
    while let Some(r) = rows.try_next().await.context("querying comments table")? {
        res.push(comment_from_row(&r)?);
    }
    Ok(res)
}

pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    c: &NewComment,
) -> Result<Comment, Error> {
    let id = CommentId(Uuid::new_v4());
    // inserts nothing if the theory does not exist
    let row = sqlx::query(
        "
            INSERT INTO comments (id, theory_id, author_id, text)
            SELECT $1, id, $3, $4 FROM theories WHERE id = $2
            RETURNING created_at
        ",
    )
    .bind(id.0)
    .bind(c.theory_id.0)
    .bind(c.author_id.0)
    .bind(&c.text)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("inserting comment on {}", c.theory_id))?
    .ok_or(Error::not_found())?;
    Ok(Comment {
        id,
        theory_id: c.theory_id,
        author_id: c.author_id,
        text: c.text.clone(),
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
    })
}

/// Sets whether `user` likes `theory`, and returns the resulting snapshot.
///
/// Concurrent calls cannot lose each other's updates: the likers are one
/// row each, and the count is derived from them.
pub async fn set_like(
    conn: &mut sqlx::PgConnection,
    theory: TheoryId,
    user: UserId,
    liked: bool,
) -> Result<Theory, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    if !theory_exists(&mut *tx, theory).await? {
        return Err(Error::not_found());
    }
    let query = if liked {
        "
            INSERT INTO theory_likes (theory_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
        "
    } else {
        "DELETE FROM theory_likes WHERE theory_id = $1 AND user_id = $2"
    };
    sqlx::query(query)
        .bind(theory.0)
        .bind(user.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("setting like of {user} on {theory} to {liked}"))?;
    let snapshot = fetch_theory(&mut *tx, theory)
        .await?
        .ok_or(Error::not_found())?;
    tx.commit().await.context("committing like")?;
    Ok(snapshot)
}
