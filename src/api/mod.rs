//! HTTP surface: router, shared state, SSE bridge, handlers.

mod error;
pub mod handlers;
mod routes;
pub mod sse;
mod state;

pub use error::{ApiError, ErrorCode};
pub use routes::create_router;
pub use state::{AppState, ACCESS_TOKEN_HEADER};
