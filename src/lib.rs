// src/lib.rs
pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod matching;
pub mod models;
pub mod registry;
pub mod results;

// Re-export common types for easier access
pub use models::{
    CacheEntry, Category, CategoryFilter, FoodKind, MatchMethod, MatchQuery, MatchResult, RecordId,
    ReferenceRecord, RemoteFood,
};

// Re-export important functionality
pub use batch::run_batch;
pub use config::MatchConfig;
pub use error::{MatchError, SkipLog, SkipReason};
pub use matching::Matcher;
pub use registry::MatcherRegistry;
