//! Store backends implementing the `upfield_core::RelationalStore` contract.
//!
//! `MemoryStore` keeps tables in process memory; it backs the engine's test
//! suite and suits embedded callers. `PgStore` (feature `postgres`, on by
//! default) builds parameterized SQL over a `sqlx` Postgres pool. All SQL
//! text lives in this crate.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PgStore;
