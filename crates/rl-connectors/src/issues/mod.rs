//! Issue-tracking connectors.

pub mod github;
pub mod mock;

pub use github::{GitHubIssueConfig, GitHubIssueTracker};
pub use mock::MockIssueTracker;
