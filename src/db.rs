use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::{DocletError, Result};

/// Open the SQLite database at `path` in WAL mode.
///
/// With `create_if_missing` the parent directory and the database file are
/// created on demand. Without it a missing file is reported as
/// [`DocletError::IndexUnavailable`].
pub async fn connect(path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
    let unavailable = |reason: String| DocletError::IndexUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    if create_if_missing {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }
    } else if !path.exists() {
        return Err(unavailable(
            "database does not exist; run `doclet init` first".into(),
        ));
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| unavailable(e.to_string()))?
        .create_if_missing(create_if_missing)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    Ok(pool)
}

/// Delete the database file and its WAL side files. Missing files are fine.
pub fn remove_database(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        targets.push(side.into());
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(DocletError::IndexWrite(format!(
                    "cannot remove {}: {}",
                    target.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}
