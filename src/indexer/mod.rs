//! Ordered multi-source indexer (§4.3).

mod mesh;
mod queue;

pub use mesh::IndexerMesh;
pub use queue::ConcurrentQueue;
