//! Social Handlers and Router
//!
//! Friends, matching, messaging and identity routes. Every route here sits
//! behind the auth middleware applied in `core::router`.

use crate::core::AppState;
use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub mod friends;
pub mod matches;
pub mod messages;
pub mod realtime;
pub mod users;

pub fn router() -> Router<AppState> {
    Router::new()
        // Friends system
        .route("/friends", get(friends::list_friends))
        .route("/friends/search", get(friends::search_candidates))
        .route("/friends/{user_id}", delete(friends::remove_friend))
        .route("/friends/requests", post(friends::send_friend_request))
        .route(
            "/friends/requests/received",
            get(friends::list_received_requests),
        )
        .route("/friends/requests/sent", get(friends::list_sent_requests))
        .route(
            "/friends/requests/{request_id}",
            put(friends::respond_friend_request),
        )
        // Partner matching
        .route("/matches", get(matches::get_matches))
        // Direct messages
        .route("/messages", post(messages::send_message))
        .route("/messages/conversations", get(messages::list_conversations))
        .route("/messages/unread", get(messages::unread_count))
        .route(
            "/messages/{other_id}",
            get(messages::get_conversation).delete(messages::delete_conversation),
        )
        .route(
            "/messages/item/{message_id}",
            delete(messages::delete_message),
        )
        // Identity
        .route("/users/me", get(users::me))
}
