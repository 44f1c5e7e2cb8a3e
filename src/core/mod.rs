//! Core engine modules - memo cache, invalidation table, undo history
//!
//! Nothing here knows about movies or pixels; the entities plug in through
//! [`CacheableComputation`](cache::CacheableComputation) and
//! [`HistoryEntry`](history::HistoryEntry).

pub mod budget;
pub mod cache;
pub mod cache_key;
pub mod history;
pub mod versions;

// Re-exports for convenience
pub use budget::MemoryBudget;
pub use cache::{ByteSize, CacheStats, CacheStore, CacheableComputation};
pub use cache_key::{CacheKey, DependencySet, Descriptor, Param};
pub use history::{HistoryEntry, HistoryLog, HistoryStep, UndoFilter};
pub use versions::{EntityId, Version, VersionTable};
