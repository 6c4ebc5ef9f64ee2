/// Derivative cache
///
/// - Key derivation and file naming (key.rs)
/// - Lookup and render-on-miss (store.rs)
/// - Purging on source changes (invalidate.rs)

pub mod invalidate;
pub mod key;
pub mod store;

pub use invalidate::{Invalidator, PurgeReport};
pub use key::{CacheKey, CacheKeyBuilder};
pub use store::{CacheLayout, CacheStore, DEFAULT_MAX_DIMENSION};
