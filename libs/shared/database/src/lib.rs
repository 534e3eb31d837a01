pub mod error;
pub mod kv;
pub mod memory_store;
pub mod persistent;
pub mod redis_store;
pub mod supabase;

pub use error::StoreError;
pub use kv::KeyValueStore;
pub use memory_store::MemoryStore;
pub use persistent::{MemoryPersistentStore, PersistentStore};
pub use redis_store::RedisStore;
pub use supabase::SupabaseStore;
