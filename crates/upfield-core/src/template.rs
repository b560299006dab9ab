//! Path-template macro engine
//!
//! Action templates describe where an uploaded file lands using three
//! macros: `__NAME__` (original filename), `__ID__` (assigned primary key),
//! `__EXTN__` (extension after the last dot, case preserved). Unrecognized
//! tokens pass through unchanged.

use crate::error::{UploadError, UploadResult};
use crate::upload::extension_of;

pub const NAME_MACRO: &str = "__NAME__";
pub const ID_MACRO: &str = "__ID__";
pub const EXTN_MACRO: &str = "__EXTN__";

/// Substitute all three macros into `template`.
///
/// When `__NAME__` is used, the filename must be a single path component:
/// names containing separators or `..` are rejected so a client-controlled
/// filename cannot escape the target directory.
pub fn resolve(template: &str, file_name: &str, id: &str) -> UploadResult<String> {
    let mut out = template.to_string();
    if out.contains(NAME_MACRO) {
        ensure_plain_file_name(file_name)?;
        out = out.replace(NAME_MACRO, file_name);
    }
    out = out.replace(ID_MACRO, id);
    out = out.replace(EXTN_MACRO, extension_of(file_name).unwrap_or(""));
    Ok(out)
}

/// Substitute only `__ID__`, used for deferred non-path columns.
pub fn substitute_id(value: &str, id: &str) -> String {
    value.replace(ID_MACRO, id)
}

pub(crate) fn ensure_plain_file_name(name: &str) -> UploadResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(UploadError::Validation(format!(
            "file name {name:?} is not a plain file name"
        )));
    }
    Ok(())
}
