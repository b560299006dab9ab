//! Upload validator chain
//!
//! Runs before any side effect: transfer status first, then the extension
//! allow-list, then the plain-file-name guard when the action template
//! embeds the original filename, then caller validators in registration
//! order. The chain stops at the first failure.

use crate::error::{UploadError, UploadResult};
use crate::spec::{UploadAction, UploadSpec};
use crate::template;
use crate::upload::{TransferStatus, UploadMetadata};

pub fn run_chain(spec: &UploadSpec, upload: &UploadMetadata) -> UploadResult<()> {
    match upload.status {
        TransferStatus::Received => {}
        TransferStatus::SizeExceeded => {
            return Err(UploadError::Transfer(
                "the uploaded file exceeds the permitted size".to_string(),
            ));
        }
        TransferStatus::Failed(code) => {
            return Err(UploadError::Transfer(format!(
                "the file transfer failed (code {code})"
            )));
        }
    }

    if !spec.allowed_extensions().is_empty() {
        let allowed = upload
            .extension()
            .map(|ext| {
                spec.allowed_extensions()
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if !allowed {
            return Err(UploadError::Validation(
                spec.extension_error_message().to_string(),
            ));
        }
    }

    // A traversal filename must be caught here, before the executor has
    // written anything, not when the template is resolved post-insert.
    if let UploadAction::Template(tpl) = spec.action() {
        if tpl.contains(template::NAME_MACRO) {
            template::ensure_plain_file_name(&upload.file_name)?;
        }
    }

    for validator in spec.validators() {
        if let Err(message) = validator(upload) {
            return Err(UploadError::Validation(message));
        }
    }

    Ok(())
}
