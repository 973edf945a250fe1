pub mod admin;
pub mod audit;
pub mod auth;
pub mod notify;
pub mod payment;
