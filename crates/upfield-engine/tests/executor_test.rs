//! End-to-end executor scenarios against the in-memory store.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use upfield_core::{
    ComputedFn, FieldSource, IntakeConfig, RelationalStore, Select, StoreActionFn, UploadError,
    UploadMetadata, UploadSpec, Value,
};
use upfield_engine::{UploadExecutor, UploadOutcome};
use upfield_store::MemoryStore;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

/// Write a staged file and return its upload metadata.
async fn stage(dir: &TempDir, name: &str, bytes: &[u8]) -> UploadMetadata {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let staged = dir.path().join(format!("stage-{name}"));
    tokio::fs::write(&staged, bytes).await.unwrap();
    UploadMetadata::new(name, staged, bytes.len() as u64, "application/x-unknown")
}

fn template_in(dir: &TempDir) -> String {
    format!("{}/uploads/__ID__.__EXTN__", dir.path().display())
}

#[tokio::test]
async fn successful_upload_inserts_backfills_and_moves() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let doc_root = dir.path().display().to_string();

    let spec = Arc::new(
        UploadSpec::with_template(template_in(&dir))
            .allow_extensions(["png", "jpg"])
            .db_table("uploads", "id")
            .map_field("path", FieldSource::SystemPath)
            .map_field("web_path", FieldSource::WebPath)
            .map_field("file_name", FieldSource::FileName)
            .map_field("size", FieldSource::FileSize)
            .map_field("ext", FieldSource::Extension)
            .map_field("mime", FieldSource::ContentType)
            .map_field("body", FieldSource::Content)
            .map_field("notes", FieldSource::ReadOnly)
            .document_root(&doc_root)
            .file_mode(0o640),
    );

    let upload = stage(&dir, "photo.PNG", PNG_MAGIC).await;
    let executor = UploadExecutor::new(spec, store.clone());
    let outcome = executor.execute(&upload).await.unwrap();
    assert_eq!(outcome, UploadOutcome::RowId(Value::Int(1)));

    let rows = store.select(&Select::new("uploads")).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];

    let expected_path = format!("{doc_root}/uploads/1.PNG");
    assert_eq!(row.get("path"), Some(&Value::Text(expected_path.clone())));
    // Web path is the system path with the document root stripped.
    assert_eq!(
        row.get("web_path"),
        Some(&Value::Text("/uploads/1.PNG".to_string()))
    );
    assert_eq!(
        row.get("file_name"),
        Some(&Value::Text("photo.PNG".to_string()))
    );
    assert_eq!(row.get("size"), Some(&Value::Int(PNG_MAGIC.len() as i64)));
    // Extension keeps the original case.
    assert_eq!(row.get("ext"), Some(&Value::Text("PNG".to_string())));
    // MIME type comes from the bytes, not the client-reported type.
    assert_eq!(row.get("mime"), Some(&Value::Text("image/png".to_string())));
    assert_eq!(row.get("body"), Some(&Value::Bytes(PNG_MAGIC.to_vec())));
    // ReadOnly columns are omitted from the write entirely.
    assert!(row.get("notes").is_none());

    // The staged file was moved into place.
    let stored = PathBuf::from(&expected_path);
    assert!(stored.exists());
    assert!(!upload.staged_path.exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&stored).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}

#[tokio::test]
async fn rejected_upload_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let spec = Arc::new(
        UploadSpec::with_template(template_in(&dir))
            .allow_extensions(["png", "jpg"])
            .extension_error("executables are not welcome here")
            .db_table("uploads", "id")
            .map_field("path", FieldSource::SystemPath),
    );

    let upload = stage(&dir, "virus.exe", b"MZ\x90\x00").await;
    let executor = UploadExecutor::new(spec, store.clone());
    let err = executor.execute(&upload).await.unwrap_err();

    assert_eq!(err.to_string(), "executables are not welcome here");
    assert_eq!(store.row_count("uploads"), 0);
    // The staged file is left untouched for the transport layer.
    assert!(upload.staged_path.exists());
    assert!(!dir.path().join("uploads").exists());
}

#[tokio::test]
async fn traversal_file_name_is_rejected_before_any_insert() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let template = format!("{}/uploads/__NAME__", dir.path().display());
    let spec = Arc::new(
        UploadSpec::with_template(template)
            .db_table("uploads", "id")
            .map_field("path", FieldSource::SystemPath),
    );

    let staged = stage(&dir, "escape.png", PNG_MAGIC).await;
    let upload = UploadMetadata::new(
        "../escape.png",
        staged.staged_path.clone(),
        staged.size_bytes,
        "image/png",
    );

    let err = UploadExecutor::new(spec, store.clone())
        .execute(&upload)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Validation(_)));
    assert!(err.to_string().contains("not a plain file name"));
    // No sentinel row may remain behind the validation failure.
    assert_eq!(store.row_count("uploads"), 0);
    assert!(upload.staged_path.exists());
}

#[tokio::test]
async fn relative_template_is_anchored_under_the_configured_upload_dir() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let config = IntakeConfig {
        document_root: Some(dir.path().display().to_string()),
        upload_dir: dir.path().to_path_buf(),
        default_file_mode: 0o600,
    };
    let spec = Arc::new(
        UploadSpec::with_template("uploads/__ID__.__EXTN__")
            .db_table("uploads", "id")
            .map_field("path", FieldSource::SystemPath)
            .map_field("web_path", FieldSource::WebPath),
    );

    let upload = stage(&dir, "photo.png", PNG_MAGIC).await;
    let outcome = UploadExecutor::new(spec, store.clone())
        .with_config(config)
        .execute(&upload)
        .await
        .unwrap();
    assert_eq!(outcome, UploadOutcome::RowId(Value::Int(1)));

    let stored = dir.path().join("uploads/1.png");
    assert!(stored.exists());

    let rows = store.select(&Select::new("uploads")).await.unwrap();
    assert_eq!(
        rows[0].get("path"),
        Some(&Value::Text(stored.display().to_string()))
    );
    // The document root and file mode come from the config when the spec
    // leaves them unset.
    assert_eq!(
        rows[0].get("web_path"),
        Some(&Value::Text("/uploads/1.png".to_string()))
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&stored).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn custom_action_with_path_column_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let action: StoreActionFn =
        Arc::new(|_, _| Box::pin(async { Ok("s3://bucket/object".to_string()) }));
    let spec = Arc::new(
        UploadSpec::with_custom_action(action)
            .db_table("uploads", "id")
            .map_field("path", FieldSource::SystemPath),
    );

    let upload = stage(&dir, "photo.png", PNG_MAGIC).await;
    let executor = UploadExecutor::new(spec, store.clone());
    let err = executor.execute(&upload).await.unwrap_err();

    assert!(err.to_string().contains("custom store action"));
    // Rejected before any database interaction.
    assert_eq!(store.row_count("uploads"), 0);
    assert!(upload.staged_path.exists());
}

#[tokio::test]
async fn custom_action_receives_the_assigned_id() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let action: StoreActionFn = Arc::new(|upload: &UploadMetadata, id: Option<&Value>| {
        let name = upload.file_name.clone();
        let id = id.cloned();
        Box::pin(async move {
            let id = id.map(|v| v.render()).unwrap_or_default();
            Ok(format!("s3://bucket/{id}/{name}"))
        })
    });
    let spec = Arc::new(
        UploadSpec::with_custom_action(action)
            .db_table("uploads", "id")
            .map_field("file_name", FieldSource::FileName),
    );

    let upload = stage(&dir, "photo.png", PNG_MAGIC).await;
    let executor = UploadExecutor::new(spec, store.clone());
    let outcome = executor.execute(&upload).await.unwrap();

    assert_eq!(
        outcome,
        UploadOutcome::Location("s3://bucket/1/photo.png".to_string())
    );
    assert_eq!(store.row_count("uploads"), 1);
}

#[tokio::test]
async fn computed_primary_key_overrides_the_generated_id() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let computed: ComputedFn = Arc::new(|_store: &dyn RelationalStore, _upload: &UploadMetadata| {
        Box::pin(async { Ok(Value::Int(500)) })
    });
    let spec = Arc::new(
        UploadSpec::with_template(template_in(&dir))
            .db_table("uploads", "id")
            .map_field("id", FieldSource::Computed(computed))
            .map_field("path", FieldSource::SystemPath),
    );

    let upload = stage(&dir, "photo.png", PNG_MAGIC).await;
    let executor = UploadExecutor::new(spec, store.clone());
    let outcome = executor.execute(&upload).await.unwrap();
    assert_eq!(outcome, UploadOutcome::RowId(Value::Int(500)));

    let rows = store.select(&Select::new("uploads")).await.unwrap();
    assert_eq!(rows[0].get("id"), Some(&Value::Int(500)));
    let path = rows[0].get("path").and_then(|v| v.as_text()).unwrap();
    assert!(path.ends_with("/uploads/500.png"));
}

#[tokio::test]
async fn literal_text_columns_defer_and_substitute_the_id() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let spec = Arc::new(
        UploadSpec::with_template(template_in(&dir))
            .db_table("uploads", "id")
            .map_field(
                "gallery",
                FieldSource::Literal(Value::Text("/gallery/__ID__".to_string())),
            )
            .map_field("attempts", FieldSource::Literal(Value::Int(0))),
    );

    let upload = stage(&dir, "photo.png", PNG_MAGIC).await;
    UploadExecutor::new(spec, store.clone())
        .execute(&upload)
        .await
        .unwrap();

    let rows = store.select(&Select::new("uploads")).await.unwrap();
    assert_eq!(
        rows[0].get("gallery"),
        Some(&Value::Text("/gallery/1".to_string()))
    );
    assert_eq!(rows[0].get("attempts"), Some(&Value::Int(0)));
}

#[tokio::test]
async fn filesystem_only_mode_skips_the_database() {
    let dir = TempDir::new().unwrap();
    let template = format!("{}/plain/__NAME__", dir.path().display());
    let spec = Arc::new(UploadSpec::with_template(template));

    let upload = stage(&dir, "notes.txt", b"hello").await;
    let outcome = UploadExecutor::without_store(spec)
        .execute(&upload)
        .await
        .unwrap();

    let expected = format!("{}/plain/notes.txt", dir.path().display());
    assert_eq!(outcome, UploadOutcome::Location(expected.clone()));
    assert!(PathBuf::from(expected).exists());
}

#[tokio::test]
async fn move_failure_leaves_the_committed_row_in_place() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    // The destination parent is a regular file, so the move must fail.
    let blocker = dir.path().join("uploads");
    tokio::fs::write(&blocker, b"in the way").await.unwrap();

    let spec = Arc::new(
        UploadSpec::with_template(template_in(&dir))
            .db_table("uploads", "id")
            .map_field("path", FieldSource::SystemPath),
    );

    let upload = stage(&dir, "photo.png", PNG_MAGIC).await;
    let err = UploadExecutor::new(spec, store.clone())
        .execute(&upload)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("failed to store file"));
    // The row is not rolled back on a filesystem failure; the sweeper
    // reclaims it later.
    assert_eq!(store.row_count("uploads"), 1);
}
