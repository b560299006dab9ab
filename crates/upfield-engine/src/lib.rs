//! Upfield Engine
//!
//! Orchestration of upload intake: the `UploadExecutor` runs the validator
//! chain and the two-phase database write before moving the staged file into
//! place; the `OrphanSweeper` reclaims upload rows no longer referenced by
//! their owning record; the reader module serves the formatted listing path.

pub mod executor;
pub mod reader;
pub mod sweeper;

pub use executor::{UploadExecutor, UploadOutcome};
pub use reader::list_rows;
pub use sweeper::{OrphanSweeper, SweepReport};
