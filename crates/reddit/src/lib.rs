//! Reddit gateway for ada-rs.
//!
//! [`RedditGateway`] talks to the Reddit OAuth API as a script app and
//! implements `ada_core::CommunityGateway`. Requests share one
//! [`RateLimiter`] budget.

mod api;
pub mod client;
pub mod rate_limit;

pub use client::RedditGateway;
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
