//! Upload executor
//!
//! Persists file and metadata consistently even though the final storage
//! path may depend on a primary key that is only known after insert. The
//! write is two-phase: insert with a placeholder sentinel in every deferred
//! column, then resolve the path template and backfill those columns in one
//! update. The filesystem move happens last, after the row exists.
//!
//! The insert/backfill pair is deliberately not wrapped in a transaction
//! and a failed move does not roll the row back; callers wanting atomicity
//! wrap the call in the store's explicit transaction boundary, and orphaned
//! rows are reclaimed by the sweeper.

use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use uuid::Uuid;

use upfield_core::template;
use upfield_core::validation;
use upfield_core::{
    FieldSource, IntakeConfig, Predicate, RelationalStore, UploadAction, UploadError,
    UploadMetadata, UploadResult, UploadSpec, Value,
};

/// What a successful upload produced.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Database mode: identifier of the inserted row.
    RowId(Value),
    /// Custom-action or filesystem-only mode: the final storage location.
    Location(String),
}

enum DeferredKind {
    SystemPath,
    WebPath,
    Raw(String),
}

struct DeferredColumn {
    column: String,
    kind: DeferredKind,
}

pub struct UploadExecutor {
    spec: Arc<UploadSpec>,
    store: Option<Arc<dyn RelationalStore>>,
    config: IntakeConfig,
}

impl UploadExecutor {
    pub fn new(spec: Arc<UploadSpec>, store: Arc<dyn RelationalStore>) -> Self {
        UploadExecutor {
            spec,
            store: Some(store),
            config: IntakeConfig::default(),
        }
    }

    /// Filesystem-only executor; requires a spec without a database table.
    pub fn without_store(spec: Arc<UploadSpec>) -> Self {
        UploadExecutor {
            spec,
            store: None,
            config: IntakeConfig::default(),
        }
    }

    /// Environment-level defaults: consulted for the document root and file
    /// mode when the spec leaves them unset, and relative action templates
    /// are anchored under its upload directory.
    pub fn with_config(mut self, config: IntakeConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one upload event to completion.
    #[tracing::instrument(skip_all, fields(file = %upload.file_name, size = upload.size_bytes))]
    pub async fn execute(&self, upload: &UploadMetadata) -> UploadResult<UploadOutcome> {
        validation::run_chain(&self.spec, upload)?;

        // A custom action decides the storage location itself, so the
        // executor cannot know what a path column should contain.
        if matches!(self.spec.action(), UploadAction::Custom(_)) && self.spec.maps_path_column() {
            return Err(UploadError::Configuration(
                "a custom store action cannot be combined with system-path or web-path column \
                 mappings"
                    .to_string(),
            ));
        }

        let mut assigned: Option<Value> = None;
        let mut resolved: Option<String> = None;
        if self.spec.table().is_some() {
            let (id, path) = self.write_row(upload).await?;
            assigned = Some(id);
            resolved = path;
        }

        match self.spec.action() {
            UploadAction::Custom(action) => {
                let location = action(upload, assigned.as_ref()).await?;
                tracing::info!(location = %location, "custom store action completed");
                Ok(UploadOutcome::Location(location))
            }
            UploadAction::Template(template_str) => {
                let destination = match resolved {
                    Some(path) => path,
                    None => {
                        let rendered = assigned.as_ref().map(Value::render).unwrap_or_default();
                        self.resolve_destination(template_str, upload, &rendered)?
                    }
                };
                self.move_staged(upload, Path::new(&destination)).await?;
                match assigned {
                    Some(id) => Ok(UploadOutcome::RowId(id)),
                    None => Ok(UploadOutcome::Location(destination)),
                }
            }
        }
    }

    /// Phase 1 and 2 of the database write. Returns the authoritative id
    /// and the resolved system path when deferred columns required it.
    async fn write_row(&self, upload: &UploadMetadata) -> UploadResult<(Value, Option<String>)> {
        let store = self.store.as_deref().ok_or_else(|| {
            UploadError::Configuration(
                "a database table is configured but no store was provided".to_string(),
            )
        })?;
        let (Some(table), Some(pk)) = (self.spec.table(), self.spec.primary_key()) else {
            return Err(UploadError::Configuration(
                "database mode requires both a table and a primary key".to_string(),
            ));
        };

        // Staged bytes are read once when any mapped column needs them.
        let needs_bytes = self.spec.field_map().iter().any(|(_, source)| {
            matches!(
                source,
                FieldSource::Content | FieldSource::ContentType | FieldSource::MimeType
            )
        });
        let staged = if needs_bytes {
            Some(
                fs::read(&upload.staged_path)
                    .await
                    .map_err(|e| UploadError::filesystem(upload.staged_path.clone(), e))?,
            )
        } else {
            None
        };

        let sentinel = format!("pending:{}", Uuid::new_v4());
        let mut columns: Vec<(String, Value)> = Vec::new();
        let mut deferred: Vec<DeferredColumn> = Vec::new();
        let mut pk_override: Option<Value> = None;

        for (column, source) in self.spec.field_map() {
            let defer = |kind: DeferredKind, deferred: &mut Vec<DeferredColumn>| {
                deferred.push(DeferredColumn {
                    column: column.clone(),
                    kind,
                });
                Value::Text(sentinel.clone())
            };

            let value = match source {
                FieldSource::ReadOnly => continue,
                FieldSource::Content => {
                    Value::Bytes(staged.clone().unwrap_or_default())
                }
                FieldSource::ContentType | FieldSource::MimeType => {
                    Value::Text(sniff_mime(staged.as_deref().unwrap_or_default()))
                }
                FieldSource::Extension => upload
                    .extension()
                    .map(|ext| Value::Text(ext.to_string()))
                    .unwrap_or(Value::Null),
                FieldSource::FileName => Value::Text(upload.file_name.clone()),
                FieldSource::FileSize => Value::Int(upload.size_bytes as i64),
                FieldSource::SystemPath => defer(DeferredKind::SystemPath, &mut deferred),
                FieldSource::WebPath => defer(DeferredKind::WebPath, &mut deferred),
                FieldSource::Literal(literal) => match literal {
                    Value::Text(text) if !text.is_empty() => {
                        defer(DeferredKind::Raw(text.clone()), &mut deferred)
                    }
                    other => other.clone(),
                },
                FieldSource::Computed(compute) => {
                    let computed = compute(store, upload).await?;
                    if column.as_str() == pk && !computed.is_null() {
                        // Authoritative caller-supplied identifier; the
                        // store-generated id is ignored.
                        pk_override = Some(computed.clone());
                        computed
                    } else {
                        match computed {
                            Value::Text(text) if !text.is_empty() => {
                                defer(DeferredKind::Raw(text), &mut deferred)
                            }
                            other => other,
                        }
                    }
                }
            };
            columns.push((column.clone(), value));
        }

        let generated = store.insert(table, &columns, Some(pk)).await?;
        let id = pk_override.unwrap_or(Value::Int(generated));
        tracing::debug!(
            table,
            id = %id.render(),
            deferred = deferred.len(),
            "upload row inserted"
        );

        if deferred.is_empty() {
            return Ok((id, None));
        }

        let rendered_id = id.render();
        // Resolved once; the same path feeds the backfill and the move.
        let system_path = match self.spec.action() {
            UploadAction::Template(tpl) => {
                Some(self.resolve_destination(tpl, upload, &rendered_id)?)
            }
            UploadAction::Custom(_) => None,
        };

        let mut updates = Vec::with_capacity(deferred.len());
        for entry in &deferred {
            let value = match &entry.kind {
                DeferredKind::SystemPath => Value::Text(require_path(&system_path)?.to_string()),
                DeferredKind::WebPath => {
                    let path = require_path(&system_path)?;
                    let root = self
                        .spec
                        .document_root_prefix()
                        .or(self.config.document_root.as_deref());
                    Value::Text(strip_document_root(path, root))
                }
                DeferredKind::Raw(text) => {
                    Value::Text(template::substitute_id(text, &rendered_id))
                }
            };
            updates.push((entry.column.clone(), value));
        }

        store
            .update(
                table,
                &updates,
                &[Predicate::Eq {
                    column: pk.to_string(),
                    value: id.clone(),
                }],
            )
            .await?;
        tracing::debug!(
            table,
            id = %rendered_id,
            columns = updates.len(),
            "deferred columns backfilled"
        );

        Ok((id, system_path))
    }

    /// Resolve the action template, anchoring a relative result under the
    /// configured upload directory.
    fn resolve_destination(
        &self,
        template_str: &str,
        upload: &UploadMetadata,
        id: &str,
    ) -> UploadResult<String> {
        let resolved = template::resolve(template_str, &upload.file_name, id)?;
        if Path::new(&resolved).is_relative() {
            let anchored = self.config.upload_dir.join(resolved);
            return Ok(anchored.to_string_lossy().into_owned());
        }
        Ok(resolved)
    }

    async fn move_staged(&self, upload: &UploadMetadata, destination: &Path) -> UploadResult<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::filesystem(destination, e))?;
        }

        fs::rename(&upload.staged_path, destination)
            .await
            .map_err(|e| UploadError::filesystem(destination, e))?;

        let mode = self
            .spec
            .file_mode_bits()
            .unwrap_or(self.config.default_file_mode);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(destination, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| UploadError::filesystem(destination, e))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        tracing::info!(
            from = %upload.staged_path.display(),
            to = %destination.display(),
            "moved staged upload into place"
        );
        Ok(())
    }
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn require_path(system_path: &Option<String>) -> UploadResult<&str> {
    system_path.as_deref().ok_or_else(|| {
        UploadError::Configuration(
            "a path column mapping requires a path template action".to_string(),
        )
    })
}

fn strip_document_root(path: &str, root: Option<&str>) -> String {
    match root {
        Some(prefix) => path.strip_prefix(prefix).unwrap_or(path).to_string(),
        None => path.to_string(),
    }
}
