pub mod members;
pub mod notifications;
pub mod tree;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/api",
        Router::new()
            .merge(members::router())
            .merge(tree::router())
            .merge(notifications::router()),
    )
}
