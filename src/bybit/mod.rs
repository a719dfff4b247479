pub mod types;
pub mod auth;
pub mod client;

pub use types::*;
pub use auth::BybitAuth;
pub use client::BybitClient;
