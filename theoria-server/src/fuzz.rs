#![cfg(test)]

use std::{collections::BTreeSet, fmt::Debug, panic::AssertUnwindSafe};

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{self, request, StatusCode},
};
use theoria_api::{
    Comment, Error as ApiError, LikeRequest, NewComment, NewSession, NewTheory, NewUser,
    ProfileUpdate, Store, Theory, TheoryId, User, UserId,
};
use theoria_mock_server::MockServer;
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

/// Runs `$fn` against a migrated database for every generated value, if
/// THEORIA_TEST_DATABASE_URL is set. Every run shares the database, so tests
/// must only look at rows they created.
macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            let Ok(db_url) = std::env::var("THEORIA_TEST_DATABASE_URL") else {
                eprintln!("THEORIA_TEST_DATABASE_URL is not set, skipping {}", stringify!($name));
                return;
            };
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            let pool = AssertUnwindSafe(runtime.block_on(async move {
                let pool = create_sqlx_pool(&db_url).await.expect("creating sqlx pool");
                MIGRATOR.run(&pool).await.expect("failed applying migrations");
                pool
            }));
            bolero::check!()
                .with_generator($gen)
                .cloned()
                .for_each(move |v| {
                    let pool: sqlx::PgPool = (*pool).clone();
                    let () = runtime.block_on($fn(pool, v));
                });
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[tokio::test]
async fn preauth_accepts_bearer_tokens_only() {
    let tok = Uuid::new_v4();
    let parse = |header: String| async move {
        let mut req = http::Request::builder()
            .header(http::header::AUTHORIZATION, header)
            .body(())
            .unwrap()
            .into_parts()
            .0;
        PreAuth::from_request_parts(&mut req, &())
            .await
            .map(|p| p.0 .0)
            .ok()
    };
    assert_eq!(parse(format!("Bearer {tok}")).await, Some(tok));
    assert_eq!(parse(format!("bearer {tok}")).await, Some(tok));
    assert_eq!(parse(format!("Basic {tok}")).await, None);
    assert_eq!(parse(format!("Bearer {tok} extra")).await, None);
    assert_eq!(parse(String::from("Bearer not-a-uuid")).await, None);
}

async fn call<Resp>(app: &mut Router, req: request::Request<Body>) -> Result<Resp, ApiError>
where
    Resp: for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == StatusCode::OK {
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!("failed parsing resp body {body:?}: {err}");
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req).await
}

async fn get_raw(app: &mut Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = request::Builder::new()
        .uri(uri)
        .body(Body::empty())
        .expect("building request");
    let resp = app.ready().await.unwrap().call(req).await.unwrap();
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, body.to_vec())
}

/// An app whose database is never reached
fn offline_app(storage: FsStorage, admin_token: Option<AuthToken>) -> Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/theoria-unreachable")
        .expect("creating lazy pool");
    app(pool, admin_token, storage)
}

#[tokio::test]
async fn requests_without_session_are_denied() {
    let dir = tempfile::tempdir().unwrap();
    let admin = Uuid::new_v4();
    let mut app = offline_app(
        FsStorage::new(dir.path().to_path_buf(), String::new()),
        Some(AuthToken(admin)),
    );
    let res: Result<Vec<Theory>, _> = run_on_app(&mut app, "GET", "/api/theories", None, &()).await;
    assert_eq!(res, Err(ApiError::PermissionDenied));

    let user = NewUser {
        id: UserId(Uuid::new_v4()),
        name: String::from("ada"),
        display_name: String::from("Ada"),
        initial_password_hash: String::new(),
    };
    let res: Result<(), _> = run_on_app(
        &mut app,
        "POST",
        "/api/admin/create-user",
        Some(Uuid::new_v4()),
        &user,
    )
    .await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
}

#[tokio::test]
async fn admin_endpoints_are_disabled_without_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = offline_app(FsStorage::new(dir.path().to_path_buf(), String::new()), None);
    let res: Result<(), _> = run_on_app(
        &mut app,
        "POST",
        "/api/admin/create-user",
        Some(Uuid::new_v4()),
        &(),
    )
    .await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
}

#[tokio::test]
async fn stored_objects_are_served() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FsStorage::new(dir.path().to_path_buf(), String::new());
    theoria_api::ObjectStorage::upload(&storage, "profilePics/ada", b"picture".to_vec())
        .await
        .unwrap();
    let mut app = offline_app(storage, None);
    assert_eq!(
        get_raw(&mut app, "/storage/profilePics/ada").await,
        (StatusCode::OK, b"picture".to_vec())
    );
    let (status, body) = get_raw(&mut app, "/storage/profilePics/bob").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(ApiError::parse(&body).unwrap(), ApiError::NotFound);
}

/// A user known to both the app and the mock, with an open session on each
struct TestUser {
    id: UserId,
    app_token: Uuid,
}

async fn create_user(app: &mut Router, admin: Uuid, mock: &MockServer) -> TestUser {
    let id = UserId(Uuid::new_v4());
    let name = format!("user-{}", id.0.simple());
    let new_user = NewUser {
        id,
        name: name.clone(),
        display_name: format!("User {}", &name[5..9]),
        initial_password_hash: bcrypt::hash("password", 4).expect("hashing password"),
    };
    let app_res: Result<(), _> =
        run_on_app(app, "POST", "/api/admin/create-user", Some(admin), &new_user).await;
    assert_eq!(app_res, mock.admin_create_user(new_user));
    let session = NewSession {
        user: name,
        password: String::from("password"),
        device: String::from("test"),
    };
    let app_token: theoria_api::AuthToken = run_on_app(app, "POST", "/api/auth", None, &session)
        .await
        .expect("logging in");
    mock.auth(session).expect("logging in on mock");
    TestUser {
        id,
        app_token: app_token.0,
    }
}

async fn fresh_app(pool: sqlx::PgPool) -> (Router, Uuid, tempfile::TempDir) {
    let admin = Uuid::new_v4();
    let dir = tempfile::tempdir().expect("creating storage dir");
    let storage = FsStorage::new(dir.path().to_path_buf(), String::from("http://theoria.test"));
    (app(pool, Some(AuthToken(admin)), storage), admin, dir)
}

#[derive(Clone, Debug)]
struct LikeOp {
    user: u8,
    liked: bool,
}

do_sqlx_test!(
    likes_match_the_mock,
    bolero::generator::gen_with::<Vec<(u8, bool)>>().len(1..30usize),
    |pool, ops: Vec<(u8, bool)>| async move {
        let ops = ops.into_iter().map(|(user, liked)| LikeOp { user, liked });
        let (mut app, admin, _dir) = fresh_app(pool).await;
        let mock = MockServer::new();
        let mut users = Vec::new();
        for _ in 0..4 {
            users.push(create_user(&mut app, admin, &mock).await);
        }
        let new_theory = NewTheory {
            author_id: users[0].id,
            title: String::from("Liked or not"),
            description: String::new(),
            media_url: None,
        };
        let app_theory: Theory = run_on_app(
            &mut app,
            "POST",
            "/api/theories",
            Some(users[0].app_token),
            &new_theory,
        )
        .await
        .expect("creating theory");
        let mock_theory = mock.add_theory(new_theory).await.unwrap();

        for op in ops {
            let u = &users[usize::from(op.user) % users.len()];
            let app_res: Theory = run_on_app(
                &mut app,
                "POST",
                &format!("/api/theories/{}/like", app_theory.id),
                Some(u.app_token),
                &LikeRequest {
                    user_id: u.id,
                    liked: op.liked,
                },
            )
            .await
            .expect("setting like");
            let mock_res = mock.set_like(mock_theory.id, u.id, op.liked).await.unwrap();
            assert_eq!(app_res.like_count, mock_res.like_count, "after {op:?}");
            assert_eq!(app_res.liked_by, mock_res.liked_by, "after {op:?}");
            assert_eq!(app_res.like_count as usize, app_res.liked_by.len());
        }
    }
);

do_sqlx_test!(
    concurrent_likes_are_all_counted,
    bolero::generator::gen_with::<u8>(),
    |pool, n: u8| async move {
        let n = 2 + n % 11;
        let (mut app, admin, _dir) = fresh_app(pool).await;
        let mock = MockServer::new();
        let mut users = Vec::new();
        for _ in 0..n {
            users.push(create_user(&mut app, admin, &mock).await);
        }
        let theory: Theory = run_on_app(
            &mut app,
            "POST",
            "/api/theories",
            Some(users[0].app_token),
            &NewTheory {
                author_id: users[0].id,
                title: String::from("Popular"),
                description: String::new(),
                media_url: None,
            },
        )
        .await
        .unwrap();
        let likes = users.iter().map(|u| {
            let mut app = app.clone();
            let uri = format!("/api/theories/{}/like", theory.id);
            async move {
                let res: Result<Theory, _> = run_on_app(
                    &mut app,
                    "POST",
                    &uri,
                    Some(u.app_token),
                    &LikeRequest {
                        user_id: u.id,
                        liked: true,
                    },
                )
                .await;
                res
            }
        });
        for res in futures::future::join_all(likes).await {
            res.expect("liking");
        }
        let theory: Option<Theory> = run_on_app(
            &mut app,
            "GET",
            &format!("/api/theories/{}", theory.id),
            Some(users[0].app_token),
            &(),
        )
        .await
        .unwrap();
        let theory = theory.expect("theory disappeared");
        assert_eq!(theory.like_count, u64::from(n));
        assert_eq!(
            theory.liked_by,
            users.iter().map(|u| u.id).collect::<BTreeSet<_>>()
        );
    }
);

do_sqlx_test!(
    feed_session_flow,
    bolero::generator::gen_with::<String>().len(1..40usize),
    |pool, text: String| async move {
        let (mut app, admin, _dir) = fresh_app(pool).await;
        let mock = MockServer::new();
        let ada = create_user(&mut app, admin, &mock).await;
        let bob = create_user(&mut app, admin, &mock).await;
        let tok = Some(ada.app_token);

        let me: UserId = run_on_app(&mut app, "GET", "/api/whoami", tok, &()).await.unwrap();
        assert_eq!(me, ada.id);

        let theory: Theory = run_on_app(
            &mut app,
            "POST",
            "/api/theories",
            tok,
            &NewTheory {
                author_id: ada.id,
                title: String::from("Pyramids are batteries"),
                description: String::from("hear me out"),
                media_url: None,
            },
        )
        .await
        .unwrap();
        let impersonation: Result<Theory, _> = run_on_app(
            &mut app,
            "POST",
            "/api/theories",
            tok,
            &NewTheory {
                author_id: bob.id,
                title: String::from("not mine"),
                description: String::new(),
                media_url: None,
            },
        )
        .await;
        assert_eq!(impersonation, Err(ApiError::PermissionDenied));

        let comment = NewComment {
            theory_id: theory.id,
            author_id: ada.id,
            text: text.clone(),
        };
        let uri = format!("/api/theories/{}/comments", theory.id);
        let res: Result<Comment, _> = run_on_app(&mut app, "POST", &uri, tok, &comment).await;
        let listed: Vec<Comment> = run_on_app(&mut app, "GET", &uri, tok, &()).await.unwrap();
        match res {
            Ok(c) => {
                assert_eq!(c.text, text);
                assert_eq!(listed, vec![c]);
            }
            Err(ApiError::NullByteInString(_)) => {
                assert!(text.contains('\0'));
                assert!(listed.is_empty());
            }
            Err(e) => panic!("unexpected error adding comment: {e}"),
        }

        let missing: Result<Comment, _> = run_on_app(
            &mut app,
            "POST",
            &format!("/api/theories/{}/comments", Uuid::new_v4()),
            tok,
            &NewComment {
                theory_id: TheoryId(Uuid::nil()),
                ..comment
            },
        )
        .await;
        assert_eq!(missing, Err(ApiError::PermissionDenied));

        let theories: Vec<Theory> = run_on_app(&mut app, "GET", "/api/theories", tok, &())
            .await
            .unwrap();
        assert!(theories.iter().any(|t| t.id == theory.id));
        assert!(theories
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));

        let users: Vec<User> = run_on_app(&mut app, "GET", "/api/users", tok, &()).await.unwrap();
        assert!(users.iter().any(|u| u.id == bob.id));
        let deleted: Option<User> = run_on_app(
            &mut app,
            "GET",
            &format!("/api/users/{}", Uuid::new_v4()),
            tok,
            &(),
        )
        .await
        .unwrap();
        assert_eq!(deleted, None);

        let profile: User = run_on_app(
            &mut app,
            "POST",
            "/api/profile",
            tok,
            &ProfileUpdate {
                bio: String::from("questioning everything"),
                photo_url: Some(String::from("http://theoria.test/storage/x")),
            },
        )
        .await
        .unwrap();
        let profile_again: User = run_on_app(
            &mut app,
            "POST",
            "/api/profile",
            tok,
            &ProfileUpdate {
                bio: String::from("still questioning"),
                photo_url: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(profile_again.photo_url, profile.photo_url);
        assert_eq!(profile_again.bio.as_deref(), Some("still questioning"));

        let () = run_on_app(&mut app, "POST", "/api/unauth", tok, &()).await.unwrap();
        let after: Result<UserId, _> = run_on_app(&mut app, "GET", "/api/whoami", tok, &()).await;
        assert_eq!(after, Err(ApiError::PermissionDenied));
    }
);

do_sqlx_test!(
    profile_pictures_are_private_to_their_user,
    bolero::generator::gen_with::<Vec<u8>>().len(0..64usize),
    |pool, picture: Vec<u8>| async move {
        let (mut app, admin, _dir) = fresh_app(pool).await;
        let mock = MockServer::new();
        let ada = create_user(&mut app, admin, &mock).await;
        let bob = create_user(&mut app, admin, &mock).await;

        let put = |user: &TestUser, target: UserId| {
            request::Builder::new()
                .method("PUT")
                .uri(format!("/api/storage/profilePics/{}", target))
                .header(http::header::AUTHORIZATION, format!("bearer {}", user.app_token))
                .body(Body::from(picture.clone()))
                .expect("building request")
        };
        let res: Result<(), _> = call(&mut app, put(&bob, ada.id)).await;
        assert_eq!(res, Err(ApiError::PermissionDenied));
        let () = call(&mut app, put(&ada, ada.id)).await.unwrap();

        let url: String = run_on_app(
            &mut app,
            "GET",
            &format!("/api/storage/profilePics/{}", ada.id),
            Some(bob.app_token),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(
            url,
            format!("http://theoria.test/storage/profilePics/{}", ada.id)
        );
        assert_eq!(
            get_raw(&mut app, &format!("/storage/profilePics/{}", ada.id)).await,
            (StatusCode::OK, picture.clone())
        );
    }
);

do_sqlx_test!(
    http_store_speaks_the_server_protocol,
    bolero::generator::gen_with::<Vec<u8>>().len(1..64usize),
    |pool, picture: Vec<u8>| async move {
        use theoria_api::{profile_picture_path, AuthProvider, ObjectStorage};
        use theoria_client::{fetch_feed, HttpStore, UserCache, SENTINEL_NAME};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("binding listener");
        let base = format!("http://{}", listener.local_addr().expect("reading local address"));
        let dir = tempfile::tempdir().expect("creating storage dir");
        let admin = Uuid::new_v4();
        let storage = FsStorage::new(dir.path().to_path_buf(), base.clone());
        let app = app(pool, Some(AuthToken(admin)), storage);
        let mut local = app.clone();
        let server = tokio::spawn(
            axum::Server::from_tcp(listener)
                .expect("serving on listener")
                .serve(app.into_make_service()),
        );

        let mock = MockServer::new();
        let ada = create_user(&mut local, admin, &mock).await;
        let store = HttpStore::login(
            base.clone(),
            NewSession {
                user: format!("user-{}", ada.id.0.simple()),
                password: String::from("password"),
                device: String::from("http-test"),
            },
        )
        .await
        .expect("logging in over http");
        assert_eq!(store.current_user(), Some(ada.id));

        let theory = store
            .add_theory(NewTheory {
                author_id: ada.id,
                title: String::from("Birds are drones"),
                description: String::new(),
                media_url: None,
            })
            .await
            .unwrap();
        assert_eq!(store.get_theory(theory.id).await.unwrap(), Some(theory.clone()));
        assert_eq!(store.get_theory(TheoryId(Uuid::new_v4())).await.unwrap(), None);
        assert_eq!(store.get_user(UserId(Uuid::new_v4())).await.unwrap(), None);

        let liked = store.set_like(theory.id, ada.id, true).await.unwrap();
        assert_eq!(liked.like_count, 1);
        assert!(liked.is_liked_by(&ada.id));

        let comment = store
            .add_comment(NewComment {
                theory_id: theory.id,
                author_id: ada.id,
                text: String::from("hello"),
            })
            .await
            .unwrap();
        assert_eq!(comment.author_id, ada.id);

        let feed = fetch_feed(&store, &mut UserCache::new()).await;
        let view = feed
            .iter()
            .find(|v| v.id() == theory.id)
            .expect("theory missing from feed");
        assert_eq!(view.theory.like_count, 1);
        assert_eq!(view.author.id, Some(ada.id));
        assert_ne!(view.author.display_name, SENTINEL_NAME);
        assert_eq!(view.comments.len(), 1);
        assert_eq!(view.comments[0].comment, comment);

        let path = profile_picture_path(ada.id);
        let () = store.upload(&path, picture.clone()).await.unwrap();
        let url = store.download_url(&path).await.unwrap();
        assert_eq!(url, format!("{base}/storage/{path}"));
        assert_eq!(
            get_raw(&mut local, &format!("/storage/{path}")).await,
            (StatusCode::OK, picture)
        );
        let missing = store.download_url("media/nothing-here").await.unwrap_err();
        assert_eq!(missing.downcast_ref::<ApiError>(), Some(&ApiError::NotFound));

        store.sign_out().await.unwrap();
        assert_eq!(store.current_user(), None);
        let err = store.list_theories().await.unwrap_err();
        assert_eq!(err.downcast_ref::<ApiError>(), Some(&ApiError::PermissionDenied));

        server.abort();
    }
);
