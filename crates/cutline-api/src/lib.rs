//! HTTP surface for render submission.
//!
//! Callers post a timeline document, poll its status and may cancel it while
//! it is still queued. Rendering itself happens in `cutline-worker`; the two
//! processes share only the coordination store.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
