pub mod access;
pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod journals;
pub mod media;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod state;
pub mod validation;

pub use config::Config;
pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, AppStateInner};
