//! HTTP API handlers for chatrelay-server

pub mod chats;
pub mod health;

pub use chats::chat_routes;
pub use health::health_routes;
