//! Cache key layout for one parent.
//!
//! ```text
//! list/<parent>/items          merged item list
//! captures/<parent>/<item id>  one loaded payload
//! analysis/<parent>/result     output of the dependent action
//! ```

use glint_cache::{CacheKey, Namespace, TieredCache};
use glint_core::{GlintResult, ItemId, ParentId};

pub const LIST_KIND: &str = "list";
pub const CAPTURES_KIND: &str = "captures";
pub const ANALYSIS_KIND: &str = "analysis";

pub fn list_namespace(parent: ParentId) -> Namespace {
    Namespace::new(LIST_KIND).scoped(parent)
}

pub fn captures_namespace(parent: ParentId) -> Namespace {
    Namespace::new(CAPTURES_KIND).scoped(parent)
}

pub fn analysis_namespace(parent: ParentId) -> Namespace {
    Namespace::new(ANALYSIS_KIND).scoped(parent)
}

pub fn list_key(parent: ParentId) -> CacheKey {
    list_namespace(parent).key("items")
}

/// Keyed by item id: positions shift whenever a refresh prepends items.
pub fn capture_key(parent: ParentId, item: ItemId) -> CacheKey {
    captures_namespace(parent).key(item)
}

pub fn analysis_key(parent: ParentId) -> CacheKey {
    analysis_namespace(parent).key("result")
}

/// Drop everything cached for `parent`: its list, its payloads and its
/// analysis result. Call after a mutation that changes the parent's data.
pub async fn invalidate_related(cache: &TieredCache, parent: ParentId) -> GlintResult<u64> {
    let mut removed = 0;
    for namespace in [
        list_namespace(parent),
        captures_namespace(parent),
        analysis_namespace(parent),
    ] {
        removed += cache.invalidate_namespace(&namespace).await?;
    }
    tracing::debug!(parent = %parent, removed, "Invalidated related cache entries");
    Ok(removed)
}
