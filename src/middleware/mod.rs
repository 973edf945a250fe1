pub mod admin;
pub mod api_log;
pub mod auth;

pub use admin::admin_guard;
pub use api_log::api_log_middleware;
pub use auth::auth_middleware;
