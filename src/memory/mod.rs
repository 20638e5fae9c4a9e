pub mod hybrid;
pub mod store;

pub use hybrid::{HybridRetriever, LexicalReranker, Reranker};
pub use store::{MemoryRecord, MemoryStore};
