//! Upload field configuration
//!
//! `UploadSpec` is built once at field-definition time with fluent consuming
//! setters and is immutable afterwards, so it is safe to share across
//! concurrent in-flight uploads. Caller-supplied behavior (validators,
//! computed values, the orphan policy, where-clause contributors, the row
//! formatter) is injected as plain function values rather than through a
//! trait hierarchy: any pure function works.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::UploadResult;
use crate::query::Select;
use crate::store::RelationalStore;
use crate::upload::UploadMetadata;
use crate::value::{Row, Value};

/// Pre-side-effect check against the incoming upload. Returns the
/// user-facing message on rejection.
pub type ValidatorFn = Arc<dyn Fn(&UploadMetadata) -> Result<(), String> + Send + Sync>;

/// Computed column value. Receives the store so a computation may consult
/// other tables.
pub type ComputedFn = Arc<
    dyn for<'a> Fn(
            &'a dyn RelationalStore,
            &'a UploadMetadata,
        ) -> BoxFuture<'a, UploadResult<Value>>
        + Send
        + Sync,
>;

/// Caller-supplied storage action, replacing the built-in template rename.
/// Receives the assigned identifier (absent in filesystem-only mode) and
/// returns the final storage location.
pub type StoreActionFn = Arc<
    dyn for<'a> Fn(&'a UploadMetadata, Option<&'a Value>) -> BoxFuture<'a, UploadResult<String>>
        + Send
        + Sync,
>;

/// Decides whether a batch of orphaned rows may be deleted. Only a literal
/// `true` authorizes deletion; the policy is expected to remove the
/// underlying files before approving.
pub type OrphanPolicyFn = Arc<dyn for<'a> Fn(&'a [Row]) -> BoxFuture<'a, bool> + Send + Sync>;

/// Applied in place to each row on the read path.
pub type RowFormatterFn = Arc<dyn Fn(&mut Row) + Send + Sync>;

/// Contributes predicates to every select built against the upload table.
pub type WhereFn = Arc<dyn Fn(&mut Select) + Send + Sync>;

/// Where a column's inserted value comes from.
#[derive(Clone)]
pub enum FieldSource {
    /// A constant. Non-empty text is written deferred so it may reference
    /// `__ID__`.
    Literal(Value),
    /// Raw bytes of the staged file.
    Content,
    /// MIME type sniffed from the staged file's contents.
    ContentType,
    /// Alias of `ContentType`; also sniffed, never client-reported.
    MimeType,
    /// Extension parsed from the original filename, case preserved.
    Extension,
    /// Original filename.
    FileName,
    /// Byte size of the upload.
    FileSize,
    /// Absolute filesystem path, resolved after the id is assigned.
    SystemPath,
    /// `SystemPath` minus the configured document-root prefix.
    WebPath,
    /// Omitted from writes entirely; exists for read-path formatting.
    ReadOnly,
    /// Caller-computed value.
    Computed(ComputedFn),
}

impl fmt::Debug for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldSource::Literal(v) => return write!(f, "Literal({v:?})"),
            FieldSource::Content => "Content",
            FieldSource::ContentType => "ContentType",
            FieldSource::MimeType => "MimeType",
            FieldSource::Extension => "Extension",
            FieldSource::FileName => "FileName",
            FieldSource::FileSize => "FileSize",
            FieldSource::SystemPath => "SystemPath",
            FieldSource::WebPath => "WebPath",
            FieldSource::ReadOnly => "ReadOnly",
            FieldSource::Computed(_) => "Computed(..)",
        };
        f.write_str(name)
    }
}

/// How the staged file is persisted.
#[derive(Clone)]
pub enum UploadAction {
    /// Move the staged file to the macro-resolved path.
    Template(String),
    /// Delegate persistence to the caller.
    Custom(StoreActionFn),
}

impl fmt::Debug for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadAction::Template(t) => write!(f, "Template({t:?})"),
            UploadAction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Configuration for one upload field.
#[derive(Clone)]
pub struct UploadSpec {
    action: UploadAction,
    allowed_extensions: Vec<String>,
    extension_error: String,
    table: Option<String>,
    primary_key: Option<String>,
    field_map: Vec<(String, FieldSource)>,
    validators: Vec<ValidatorFn>,
    row_formatter: Option<RowFormatterFn>,
    orphan_policy: Option<OrphanPolicyFn>,
    ref_column: Option<String>,
    file_mode: Option<u32>,
    where_clauses: Vec<WhereFn>,
    document_root: Option<String>,
}

impl UploadSpec {
    /// Spec whose storage action moves the staged file to a macro template.
    pub fn with_template(template: impl Into<String>) -> Self {
        Self::with_action(UploadAction::Template(template.into()))
    }

    /// Spec whose storage action is a caller-supplied function.
    pub fn with_custom_action(action: StoreActionFn) -> Self {
        Self::with_action(UploadAction::Custom(action))
    }

    pub fn with_action(action: UploadAction) -> Self {
        UploadSpec {
            action,
            allowed_extensions: Vec::new(),
            extension_error: "this file type is not permitted".to_string(),
            table: None,
            primary_key: None,
            field_map: Vec::new(),
            validators: Vec::new(),
            row_formatter: None,
            orphan_policy: None,
            ref_column: None,
            file_mode: None,
            where_clauses: Vec::new(),
            document_root: None,
        }
    }

    /// Restrict uploads to the given extensions, matched case-insensitively.
    /// An empty list means no restriction.
    pub fn allow_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn extension_error(mut self, message: impl Into<String>) -> Self {
        self.extension_error = message.into();
        self
    }

    /// Enable database behavior. Table and primary key are required
    /// together; without this call the upload is filesystem-only.
    pub fn db_table(mut self, table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self.primary_key = Some(primary_key.into());
        self
    }

    /// Append a destination column and its source. Order is preserved.
    pub fn map_field(mut self, column: impl Into<String>, source: FieldSource) -> Self {
        self.field_map.push((column.into(), source));
        self
    }

    /// Register a validator; validators run after the built-in checks, in
    /// registration order.
    pub fn validator(mut self, validator: ValidatorFn) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn row_formatter(mut self, formatter: RowFormatterFn) -> Self {
        self.row_formatter = Some(formatter);
        self
    }

    pub fn orphan_policy(mut self, policy: OrphanPolicyFn) -> Self {
        self.orphan_policy = Some(policy);
        self
    }

    /// Override the reference column used for orphan detection. Without it
    /// the owning field's qualified name is used.
    pub fn ref_column(mut self, column: impl Into<String>) -> Self {
        self.ref_column = Some(column.into());
        self
    }

    /// POSIX permission bits applied after a successful move.
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    /// Append a predicate contributor applied to every select against the
    /// upload table.
    pub fn where_clause(mut self, contributor: WhereFn) -> Self {
        self.where_clauses.push(contributor);
        self
    }

    /// Document-root prefix stripped from system paths to derive web paths.
    pub fn document_root(mut self, root: impl Into<String>) -> Self {
        self.document_root = Some(root.into());
        self
    }

    pub fn action(&self) -> &UploadAction {
        &self.action
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn extension_error_message(&self) -> &str {
        &self.extension_error
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn field_map(&self) -> &[(String, FieldSource)] {
        &self.field_map
    }

    pub fn validators(&self) -> &[ValidatorFn] {
        &self.validators
    }

    pub fn row_formatter_fn(&self) -> Option<&RowFormatterFn> {
        self.row_formatter.as_ref()
    }

    pub fn orphan_policy_fn(&self) -> Option<&OrphanPolicyFn> {
        self.orphan_policy.as_ref()
    }

    pub fn ref_column_override(&self) -> Option<&str> {
        self.ref_column.as_deref()
    }

    pub fn file_mode_bits(&self) -> Option<u32> {
        self.file_mode
    }

    pub fn where_clauses(&self) -> &[WhereFn] {
        &self.where_clauses
    }

    pub fn document_root_prefix(&self) -> Option<&str> {
        self.document_root.as_deref()
    }

    /// Whether any mapped column depends on a resolved filesystem path.
    pub fn maps_path_column(&self) -> bool {
        self.field_map
            .iter()
            .any(|(_, source)| matches!(source, FieldSource::SystemPath | FieldSource::WebPath))
    }
}

impl fmt::Debug for UploadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSpec")
            .field("action", &self.action)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("field_map", &self.field_map)
            .field("validators", &self.validators.len())
            .field("where_clauses", &self.where_clauses.len())
            .field("file_mode", &self.file_mode)
            .field("document_root", &self.document_root)
            .finish()
    }
}
