mod app;
pub use app::{App, Route};

mod assemble;
pub use assemble::{assemble, author_view, fetch_feed, resolve_users, UserCache};

mod dashboard;
pub use dashboard::{Dashboard, UserStats};

mod http;
pub use http::HttpStore;

mod session;
pub use session::{PendingLike, Session};

mod view;
pub use view::{share_url, AuthorView, CommentView, TheoryView, DEFAULT_AVATAR, SENTINEL_NAME};

pub mod api {
    pub use theoria_api::*;
}
