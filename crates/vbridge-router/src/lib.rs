mod caller_auth;
mod routes;

pub use routes::{AppState, bridge_router};
