use axum::Router;
use std::sync::Arc;

use crate::AppState;

mod anilist;
mod hianime;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/anime/hianime", hianime::routes())
        // The catalog used to be exposed under its old name; keep both mounts
        // so existing clients do not break.
        .nest("/anime/zoro", hianime::routes())
        .nest("/meta/anilist", anilist::routes())
}
