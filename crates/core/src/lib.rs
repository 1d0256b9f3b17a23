//! repomigrate core library.
//!
//! This crate provides the building blocks for migrating a batch of GitHub
//! repositories between organizations: the mapping list reader, target
//! repository provisioning, full-history mirroring, the bounded worker pool
//! that drives them, and the end-of-run report.

pub mod config;
pub mod errors;
pub mod git;
pub mod github;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod report;

// Re-exports for convenience.
pub use config::{Credentials, MigrationConfig};
pub use github::{GitHubClient, RepositoryResolver};
pub use mapping::{load_mapping_file, MappingList};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RetryPolicy};
pub use rate_limit::ApiRateLimiter;
pub use report::MigrationReport;
