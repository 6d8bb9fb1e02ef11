//! Social Coordination Layer
//!
//! Friend requests, partner matching, direct conversations and the live
//! event broker that pushes their results to connected clients.

pub mod broker;
pub mod conversations;
pub mod friends;
pub mod handlers;
pub mod matching;
pub mod notifier;

pub use handlers::router;
