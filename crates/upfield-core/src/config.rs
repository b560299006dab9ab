//! Configuration module
//!
//! Environment-driven defaults for the intake engine: the document root
//! used to derive web paths, the base directory for stored uploads, and
//! the default permission bits applied after a move.

use std::env;
use std::path::PathBuf;

const DEFAULT_UPLOAD_DIR: &str = "/var/lib/upfield/uploads";
const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Clone, Debug)]
pub struct IntakeConfig {
    /// Prefix stripped from absolute paths to derive web-relative paths.
    pub document_root: Option<String>,
    /// Base directory for stored uploads.
    pub upload_dir: PathBuf,
    /// Default POSIX mode bits for stored files, octal.
    pub default_file_mode: u32,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        IntakeConfig {
            document_root: None,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            default_file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl IntakeConfig {
    /// Load from the environment, falling back to defaults. Reads a `.env`
    /// file when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        IntakeConfig {
            document_root: env::var("UPFIELD_DOCUMENT_ROOT").ok(),
            upload_dir: env::var("UPFIELD_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            default_file_mode: env::var("UPFIELD_FILE_MODE")
                .ok()
                .and_then(|raw| u32::from_str_radix(raw.trim_start_matches("0o"), 8).ok())
                .unwrap_or(DEFAULT_FILE_MODE),
        }
    }
}
