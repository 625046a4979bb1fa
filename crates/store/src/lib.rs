//! Store adapter: a generic key/value contract with conditional writes and a
//! typed facade over the notification collections.

pub mod kv;
pub mod memory;
pub mod postgres;
pub mod store;

pub use kv::{Item, ItemKey, KvStore, Page, PageRequest, Table};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::Store;
