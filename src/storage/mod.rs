//! SQLite persistence for ingested entries.

mod entries;
mod schema;
mod store;
mod types;

pub use schema::{Database, DEFAULT_RECENT_LIMIT};
pub use store::EntryStore;
#[cfg(test)]
pub use store::MockEntryStore;
pub use types::StoreError;
