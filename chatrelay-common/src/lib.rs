//! # chatrelay Common Library
//!
//! Shared code for the chatrelay crates:
//! - Error and Result types
//! - Bootstrap configuration loading
//! - Retry-poll primitive with jittered backoff
//! - Timestamp and UUID helpers

pub mod config;
pub mod error;
pub mod retry;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use retry::{poll_until, PollOutcome, PollPolicy};
