pub mod sites;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    sites::router()
}
