//! HTTP surface
//!
//! A thin axum layer over the bridge: handlers parse the transport shape
//! (paths, headers, bodies), run the permission check, and delegate to
//! [`Bridge`](crate::areas::bridge::Bridge). All protocol intelligence
//! lives below this module, which keeps the full Git and LFS flows testable
//! without a socket.

pub mod auth;
pub mod handlers;

use crate::areas::bridge::Bridge;
use auth::AccessPolicy;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub policy: Arc<dyn AccessPolicy>,
}

/// Build the router for every endpoint the bridge serves
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/{namespace}/{repo}/info/refs",
            get(handlers::info_refs),
        )
        .route("/{namespace}/{repo}/HEAD", get(handlers::head))
        .route(
            "/{namespace}/{repo}/git-upload-pack",
            post(handlers::upload_pack),
        )
        .route(
            "/{namespace}/{repo}/git-receive-pack",
            post(handlers::receive_pack),
        )
        .route(
            "/{namespace}/{repo}/info/lfs/objects/batch",
            post(handlers::lfs_batch),
        )
        .route(
            "/{namespace}/{repo}/info/lfs/verify",
            post(handlers::lfs_verify),
        )
        .with_state(state)
}
