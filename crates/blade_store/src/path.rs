//! Where the datastore file lives.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DATA_FILE_ENV: &str = "CHAOSBLADE_DATAFILE_PATH";
pub const DATA_FILE_NAME: &str = "chaosblade.dat";

/// Resolves the datastore path from `CHAOSBLADE_DATAFILE_PATH`, next to the
/// running binary by default.
pub fn data_file_path() -> PathBuf {
    let program_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let configured = std::env::var(DATA_FILE_ENV).ok();
    resolve_data_file(configured.as_deref(), &program_dir)
}

/// A directory (existing, or missing without an extension) receives the
/// default file name; anything else is taken as the file itself. Missing
/// directories are created. Every failure falls back to the default.
pub fn resolve_data_file(configured: Option<&str>, program_dir: &Path) -> PathBuf {
    let default = program_dir.join(DATA_FILE_NAME);
    let Some(raw) = configured.filter(|s| !s.trim().is_empty()) else {
        return default;
    };
    let path = PathBuf::from(raw);

    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => path.join(DATA_FILE_NAME),
        Ok(_) => path,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let (dir, file) = if path.extension().is_some() {
                let parent = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf);
                (parent, path.clone())
            } else {
                (Some(path.clone()), path.join(DATA_FILE_NAME))
            };
            if let Some(dir) = dir {
                if let Err(e) = fs::create_dir_all(&dir) {
                    tracing::warn!(
                        "cannot create datastore directory {}: {}, using {}",
                        dir.display(),
                        e,
                        default.display()
                    );
                    return default;
                }
            }
            file
        }
        Err(e) => {
            tracing::warn!(
                "cannot stat {}={}: {}, using {}",
                DATA_FILE_ENV,
                raw,
                e,
                default.display()
            );
            default
        }
    }
}
