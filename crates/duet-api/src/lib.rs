pub mod auth;
pub mod error;
pub mod images;
pub mod messages;
pub mod middleware;
mod rows;
