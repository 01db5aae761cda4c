//! API layer
//!
//! HTTP handlers for:
//! - Protected demo resources
//! - GitHub push
//! - Operator diagnostics
//! - Metrics (Prometheus)

mod diagnostics;
mod github;
pub mod metrics;
mod protected;

pub use diagnostics::diagnostics_router;
pub use github::github_router;
pub use metrics::{metrics_router, track_http};
pub use protected::protected_router;
