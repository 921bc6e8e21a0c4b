// src/matching/mod.rs

pub mod candidates;
pub mod fuzzy;
pub mod index;
pub mod local;
pub mod normalize;
pub mod policy;
pub mod region;
pub mod remote;
pub mod scorer;
pub mod template;

use async_trait::async_trait;

use crate::models::{MatchQuery, MatchResult};

pub use local::{CandidateSource, LocalCatalogMatcher};
pub use region::RegionMatcher;
pub use remote::RemoteCatalogMatcher;
pub use template::{DishTemplateMatcher, GroceryRawMap};

/// A catalog-specific resolution strategy.
///
/// Implementations are built once at startup and shared across query
/// workers, so `resolve` takes `&self` and must not block the runtime.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Registry identifier, e.g. `fdc_local`.
    fn id(&self) -> &'static str;

    /// Resolves one query. Per-query failures are reported inside the result,
    /// never as an error.
    async fn resolve(&self, query: &MatchQuery) -> MatchResult;
}
