//! Retry policy: what to do after a stage fails.

mod backoff;
mod config;
mod policy;

pub use backoff::Backoff;
pub use config::{PatternConfig, RetryConfig};
pub use policy::{
    Classification, FatalReason, PatternError, Rejection, RejectionMatcher, RetryPolicy,
};
