//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::runtime::Controller;

/// Header carrying the shared access token, when one is configured.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    /// Empty means unauthenticated operation.
    pub access_token: String,
    /// How long an SSE stream stays open after its execution finishes.
    pub grace_shutdown: Duration,
}

impl AppState {
    pub fn new(controller: Arc<Controller>, access_token: String, grace_shutdown: Duration) -> Self {
        Self {
            controller,
            access_token,
            grace_shutdown,
        }
    }
}
