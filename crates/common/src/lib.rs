//! Common utilities and shared types for ada-rs.
//!
//! This crate provides foundational components used across all ada-rs crates:
//!
//! - **Configuration**: Bot settings via [`Config`]
//! - **Error handling**: The failure taxonomy via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use ada_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("Run {} watching for {}", id_gen.generate(), config.bot.keyword);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::{Config, RedditConfig};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
