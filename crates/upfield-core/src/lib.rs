//! Upfield Core Library
//!
//! This crate provides the domain model shared across all Upfield components:
//! the upload configuration and metadata types, the caller-facing error
//! taxonomy, the path-template macro engine, the validator chain, and the
//! `RelationalStore` contract that storage backends implement.

pub mod config;
pub mod error;
pub mod query;
pub mod spec;
pub mod store;
pub mod template;
pub mod upload;
pub mod validation;
pub mod value;

// Re-export commonly used types
pub use config::IntakeConfig;
pub use error::{UploadError, UploadResult};
pub use query::{Order, Predicate, Select};
pub use spec::{
    ComputedFn, FieldSource, OrphanPolicyFn, RowFormatterFn, StoreActionFn, UploadAction,
    UploadSpec, ValidatorFn, WhereFn,
};
pub use store::{RelationalStore, StoreError, StoreResult};
pub use upload::{TransferStatus, UploadMetadata};
pub use value::{Row, Value};
