//! CELDRAW - cel animation editor core
//!
//! Re-exports all modules for use by binary targets.

// Core engine (cache, invalidation, history)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod entities;
pub mod paths;
pub mod session;

// Re-export commonly used types from core
pub use core::budget::MemoryBudget;
pub use core::cache::{CacheStats, CacheStore};
pub use core::history::{HistoryLog, HistoryStep, UndoFilter};

// Re-export entities
pub use entities::{HistoryItem, Movie, Surface};
pub use session::EditorSession;
