//! GitHub pull request integration.
//!
//! A reqwest client for the REST API, an offline fixtures source, and the
//! watcher that keeps one batch result per active branch set.

mod client;
mod source;
pub mod types;
mod watcher;


pub use client::{GitHubClient, GitHubError};
pub use source::{FixtureSource, PullRequestSource};
pub use watcher::{GitHubWatcher, PrMap};
