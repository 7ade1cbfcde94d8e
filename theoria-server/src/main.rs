use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::migrate::Migrator;
use theoria_api::{AuthToken, Uuid};
use tower_http::trace::TraceLayer;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;
mod storage;

pub use error::Error;
use extractors::{AppState, PgPool};
use storage::FsStorage;

pub static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(structopt::StructOpt)]
struct Opt {
    /// PostgreSQL connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    /// Token to use for the admin endpoints, which are disabled when unset
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,

    #[structopt(long, env = "THEORIA_LISTEN", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Directory holding the uploaded objects
    #[structopt(
        long,
        env = "THEORIA_STORAGE_DIR",
        default_value = "storage",
        parse(from_os_str)
    )]
    storage_dir: PathBuf,

    /// Base of the URLs handed out for stored objects
    #[structopt(long, env = "THEORIA_PUBLIC_URL", default_value = "http://localhost:8000")]
    public_url: String,
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("opening database {:?}", db_url))
}

pub fn app(db: sqlx::PgPool, admin_token: Option<AuthToken>, storage: FsStorage) -> Router {
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/users", get(handlers::fetch_users))
        .route("/api/users/:id", get(handlers::fetch_user))
        .route("/api/profile", post(handlers::update_profile))
        .route(
            "/api/theories",
            get(handlers::fetch_theories).post(handlers::create_theory),
        )
        .route("/api/theories/:id", get(handlers::fetch_theory))
        .route(
            "/api/theories/:id/comments",
            get(handlers::fetch_comments).post(handlers::create_comment),
        )
        .route("/api/theories/:id/like", post(handlers::set_like))
        .route(
            "/api/storage/*path",
            get(handlers::download_url).put(handlers::upload),
        )
        .route("/storage/*path", get(handlers::download))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            db: PgPool::new(db),
            storage,
            admin_token,
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let pool = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("applying database migrations")?;

    if opt.admin_token.is_none() {
        tracing::warn!("no admin token set, admin endpoints are disabled");
    }
    tokio::fs::create_dir_all(&opt.storage_dir)
        .await
        .with_context(|| format!("creating storage directory {:?}", opt.storage_dir))?;
    let storage = FsStorage::new(opt.storage_dir, opt.public_url);

    let app = app(pool, opt.admin_token.map(AuthToken), storage);
    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
