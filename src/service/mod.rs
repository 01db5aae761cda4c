//! Service layer
//!
//! Outbound clients for:
//! - GitHub content pushes
//! - Identity provider management API

pub mod github;
pub mod management;

pub use github::{GitHubClient, PushOutcome, PushRequest, parse_repository};
pub use management::{Connection, ManagementClient, ManagementError};
