//! Ban propagation core for ada-rs.
//!
//! Detects tagged bans in moderation logs, decides where they still need to
//! be applied, applies them through a [`CommunityGateway`] and keeps the
//! registry page, retry ledger and checkpoints consistent.

pub mod services;
pub mod test_utils;

pub use services::*;
