//! Prints SQL filling a development database with theories, likes and
//! comments. Every generated user can log in with password `password`.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 8;
const NUM_DELETED_USERS: usize = 2;

const NUM_THEORIES: usize = 40;
const THEORY_TITLE_LEN: usize = 6;
const THEORY_DESCRIPTION_LEN: usize = 40;
const ORPHAN_THEORY_ONE_IN: u32 = 10;

const MAX_COMMENTS_PER_THEORY: usize = 6;
const COMMENT_LEN: usize = 15;

const MAX_AGE_DAYS: i64 = 60;

fn gen_n_items(table: &str, columns: &str, items: Vec<String>) {
    if items.is_empty() {
        return;
    }
    println!("INSERT INTO {} ({}) VALUES", table, columns);
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            println!(",");
        }
        print!("    {}", item);
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn main() {
    let mut rng = rand::thread_rng();
    let password_hash = bcrypt::hash("password", bcrypt::DEFAULT_COST).expect("hashing password");

    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    gen_n_items(
        "users",
        "id, name, password_hash, display_name, bio, followers_count, following_count",
        users
            .iter()
            .enumerate()
            .map(|(i, id)| {
                // leave some display names empty, they show up as the fallback name
                let display_name = match i % 4 {
                    3 => String::new(),
                    _ => lipsum::lipsum_title(),
                };
                format!(
                    "('{}', 'user{}', {}, {}, {}, {}, {})",
                    id,
                    i,
                    quote(&password_hash),
                    quote(&display_name),
                    quote(&lipsum::lipsum_words(12)),
                    rng.gen_range(0..500),
                    rng.gen_range(0..100),
                )
            })
            .collect(),
    );

    // authors that never got a user row, as if they had been deleted
    let deleted = (0..NUM_DELETED_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    let all_authors = users.iter().chain(deleted.iter()).copied().collect::<Vec<_>>();

    let now = Utc::now();
    let mut theories = Vec::new();
    gen_n_items(
        "theories",
        "id, author_id, title, description, created_at",
        (0..NUM_THEORIES)
            .map(|_| {
                let id = Uuid::new_v4();
                let created_at = now - Duration::minutes(rng.gen_range(0..MAX_AGE_DAYS * 24 * 60));
                theories.push((id, created_at));
                let author = match rng.gen_ratio(1, ORPHAN_THEORY_ONE_IN) {
                    true => String::from("NULL"),
                    false => format!("'{}'", all_authors.choose(&mut rng).unwrap()),
                };
                format!(
                    "('{}', {}, {}, {}, '{}')",
                    id,
                    author,
                    quote(&lipsum::lipsum_words(THEORY_TITLE_LEN)),
                    quote(&lipsum::lipsum_words(THEORY_DESCRIPTION_LEN)),
                    created_at.to_rfc3339(),
                )
            })
            .collect(),
    );

    let mut likes = Vec::new();
    for (theory, _) in &theories {
        let n = rng.gen_range(0..=users.len());
        let likers = users
            .choose_multiple(&mut rng, n)
            .collect::<BTreeSet<_>>();
        for u in likers {
            likes.push(format!("('{}', '{}')", theory, u));
        }
    }
    gen_n_items("theory_likes", "theory_id, user_id", likes);

    let mut comments = Vec::new();
    for (theory, created_at) in &theories {
        for _ in 0..rng.gen_range(0..=MAX_COMMENTS_PER_THEORY) {
            let age = (now - *created_at).num_minutes().max(1);
            let date = *created_at + Duration::minutes(rng.gen_range(0..age));
            comments.push(format!(
                "('{}', '{}', '{}', {}, '{}')",
                Uuid::new_v4(),
                theory,
                all_authors.choose(&mut rng).unwrap(),
                quote(&lipsum::lipsum_words(COMMENT_LEN)),
                date.to_rfc3339(),
            ));
        }
    }
    gen_n_items(
        "comments",
        "id, theory_id, author_id, text, created_at",
        comments,
    );
}
