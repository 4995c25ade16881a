//! Persistence layer (component B): a pooled SQLite cache of canonical URL
//! to uploaded transport file id, with embedded schema migrations.

mod migrations;
mod store;

pub use store::Store;
