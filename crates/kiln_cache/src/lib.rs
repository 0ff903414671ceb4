//! Persistent build state for incremental compilation.
//!
//! Every stage keeps a small on-disk map keyed by [`FileUrl`](kiln_common::FileUrl)
//! recording what it produced from what. The maps are loaded lazily, updated in
//! memory during a run and flushed at checkpoints. Reads are fail-safe: a
//! missing or corrupt file is an empty cache, which at worst causes extra
//! recompilation.

#![warn(missing_docs)]

pub mod dependency;
pub mod error;
pub mod manager;
mod persist;
pub mod processing;
pub mod state_cache;
pub mod status;
pub mod translating;
pub mod validity;

pub use dependency::DependencyCache;
pub use error::CacheError;
pub use manager::CacheManager;
pub use processing::{FileProcessingCache, ProcessingRecord};
pub use state_cache::{GenerationCache, StateCache, TimestampCache};
pub use status::{read_status, write_status, CompileStatus, CACHE_FORMAT_VERSION};
pub use translating::TranslatingCache;
pub use validity::ValidityState;
