//! In-memory index: bloom prefilter, radix tree for wildcard rules, and the
//! composite store that owns the atomic snapshot swap.

pub mod bloom;
pub mod radix;
pub mod store;

pub use bloom::BloomFilter;
pub use radix::RadixTree;
pub use store::{MemoryStore, StoreStats};
