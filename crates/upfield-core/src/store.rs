//! The `RelationalStore` contract
//!
//! The core defines the trait interface here; storage backends (in-memory,
//! Postgres) implement it in the `upfield-store` crate. The upload engine
//! only ever talks to `dyn RelationalStore`, so no SQL dialect leaks into
//! the intake logic.

use async_trait::async_trait;

use crate::query::{Predicate, Select};
use crate::value::{Row, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("a transaction is already in progress")]
    NestedTransaction,

    #[error("store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimum parameterized-query capability the upload engine requires.
///
/// `begin`/`commit`/`rollback` give callers an explicit transaction
/// boundary; statements issued between `begin` and `commit` run inside it.
/// The engine itself never opens a transaction — wrapping the two-phase
/// upload write is the caller's choice.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn select(&self, query: &Select) -> StoreResult<Vec<Row>>;

    /// Insert one row. Returns the last generated identifier; when
    /// `primary_key` names a non-integer or caller-supplied key column the
    /// returned value is not meaningful and callers are expected to ignore
    /// it.
    async fn insert(
        &self,
        table: &str,
        values: &[(String, Value)],
        primary_key: Option<&str>,
    ) -> StoreResult<i64>;

    /// Update matching rows, returning the number of rows affected.
    async fn update(
        &self,
        table: &str,
        values: &[(String, Value)],
        filter: &[Predicate],
    ) -> StoreResult<u64>;

    /// Delete matching rows, returning the number of rows affected.
    async fn delete(&self, table: &str, filter: &[Predicate]) -> StoreResult<u64>;

    async fn begin(&self) -> StoreResult<()>;
    async fn commit(&self) -> StoreResult<()>;
    async fn rollback(&self) -> StoreResult<()>;
}
