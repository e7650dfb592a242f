//! Storage and messaging adapters
pub mod store;
pub mod memory;
pub mod postgres;
pub mod events;

pub use store::{BillingStore, StoreError, StoreTransaction};
pub use memory::{Fault, MemoryStore};
pub use postgres::PgStore;
pub use events::EventPublisher;
