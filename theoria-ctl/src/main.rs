use anyhow::Context;
use theoria_client::{
    api::{AuthProvider, AuthToken, NewSession, NewUser, UserId, Uuid},
    fetch_feed, share_url, HttpStore, UserCache,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user
    CreateUser {
        /// Login name
        name: String,

        /// Name shown on theories and comments
        display_name: String,

        /// Initial password
        initial_password: String,
    },

    /// Print the feed as seen by a user
    Feed {
        #[structopt(short, long)]
        user: String,

        #[structopt(short, long)]
        password: String,
    },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

async fn create_user(
    host: &str,
    name: String,
    display_name: String,
    initial_password: String,
) -> anyhow::Result<()> {
    let user = NewUser::new(
        UserId(Uuid::new_v4()),
        name,
        display_name,
        &initial_password,
    )?;
    user.validate()?;
    reqwest::Client::new()
        .post(format!("{}/api/admin/create-user", host))
        .json(&user)
        .bearer_auth(admin_token()?.0)
        .send()
        .await
        .context("sending create-user request")?
        .error_for_status()
        .context("creating user")?;
    println!("created user {} with id {}", user.name, user.id);
    Ok(())
}

async fn print_feed(host: &str, user: String, password: String) -> anyhow::Result<()> {
    let store = HttpStore::login(
        String::from(host),
        NewSession {
            user,
            password,
            device: String::from("theoria-ctl"),
        },
    )
    .await?;
    let me = store
        .current_user()
        .context("no signed-in user after login")?;
    let feed = fetch_feed(&store, &mut UserCache::new()).await;
    for t in &feed {
        let liked = if t.is_liked_by(&me) { " (liked)" } else { "" };
        println!("{} by {}", t.theory.title, t.author.display_name);
        println!(
            "  {} | {} likes{} | {} comments | {}",
            t.theory.created_at,
            t.theory.like_count,
            liked,
            t.comment_count(),
            share_url(store.host(), t.id()),
        );
        for c in &t.comments {
            println!("    {}: {}", c.author.display_name, c.comment.text);
        }
    }
    if let Err(err) = store.sign_out().await {
        tracing::warn!(?err, "failed signing out");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    match opt.cmd {
        Command::CreateUser {
            name,
            display_name,
            initial_password,
        } => create_user(&opt.host, name, display_name, initial_password).await,
        Command::Feed { user, password } => print_feed(&opt.host, user, password).await,
    }
}
