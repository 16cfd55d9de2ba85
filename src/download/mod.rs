//! Acquisition: providers, failover, merging and delivery

pub mod acquire;
pub mod classify;
pub mod identity;
pub mod janitor;
pub mod merge;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod send;
pub mod source;
pub mod strategy;
pub mod validate;

// Re-exports for convenience
pub use classify::{classify, ErrorClass};
pub use identity::{ClientIdentity, IdentityRotator};
pub use pipeline::{AcquisitionRequest, Collaborators, Pipeline, PipelineOutcome, PipelineState, Target};
pub use strategy::{Strategy, StrategyState};
