//! Shared foundational types used across the Kiln build driver.
//!
//! This crate provides stable file identities ([`FileUrl`]), content hashing
//! for validity fingerprints and file modification timestamps.

#![warn(missing_docs)]

pub mod hash;
pub mod timestamp;
pub mod url;

pub use hash::ContentHash;
pub use timestamp::{current_millis, file_timestamp};
pub use url::FileUrl;
