//! Queue store implementations
//!
//! - `memory`: process-local store guarded by a single mutex
//! - `redis_store`: shared store using sorted sets, with Lua scripts for the
//!   multi-key moves that must be atomic

pub mod memory;
pub mod redis_store;

pub use memory::MemoryQueueStore;
pub use redis_store::RedisQueueStore;
