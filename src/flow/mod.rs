//! The flow cache (§4.4): keying, lifecycle, eviction, and timeouts.

mod cache;

pub use cache::{FlowCache, FlowCacheStats};
