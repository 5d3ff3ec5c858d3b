use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
};
use tracing::{debug, warn};

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes `contents` next to `path` and renames it over `path`. A crash in the middle leaves
/// either the old file or the new one, never a half written one.
pub async fn write_replacing(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temporary = sibling_with_suffix(path, ".tmp");

    let mut file = File::create(&temporary).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&temporary, path).await {
        let _ = fs::remove_file(&temporary).await;
        return Err(e);
    }
    debug!("Replaced {path:?}");
    Ok(())
}

/// Where a broken file gets moved to: `<file>.corrupted.<unix seconds>`.
pub fn quarantine_path(path: &Path, unix_seconds: i64) -> PathBuf {
    sibling_with_suffix(path, &format!(".corrupted.{unix_seconds}"))
}

/// Moves a broken file aside so the next load starts from nothing.
pub async fn quarantine(path: &Path, unix_seconds: i64) -> Result<PathBuf, io::Error> {
    let target = quarantine_path(path, unix_seconds);
    fs::rename(path, &target).await?;
    warn!("Moved corrupted {path:?} to {target:?}");
    Ok(target)
}

/// Reads a whole file, `None` if it doesn't exist.
pub async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, io::Error> {
    match fs::read(path).await {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{quarantine, quarantine_path, read_if_exists, write_replacing};

    #[tokio::test]
    async fn replacing_overwrites_and_leaves_no_temporary() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("record.json");

        write_replacing(&path, b"first").await?;
        write_replacing(&path, b"second").await?;

        assert_eq!(read_if_exists(&path).await?, Some(b"second".to_vec()));
        let names = std::fs::read_dir(path.parent().unwrap())?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(names, vec!["record.json"]);
        Ok(())
    }

    #[tokio::test]
    async fn quarantine_moves_the_file_aside() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("foreground.json");
        std::fs::write(&path, "{ not json")?;

        let moved = quarantine(&path, 1700000000).await?;

        assert_eq!(moved, dir.path().join("foreground.json.corrupted.1700000000"));
        assert!(!path.exists());
        assert!(moved.exists());
        Ok(())
    }

    #[test]
    fn quarantine_name_keeps_the_original_name() {
        assert_eq!(
            quarantine_path(Path::new("/a/b/timing_state.json"), 5),
            Path::new("/a/b/timing_state.json.corrupted.5")
        );
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() -> Result<()> {
        let dir = tempdir()?;
        assert_eq!(read_if_exists(&dir.path().join("absent")).await?, None);
        Ok(())
    }
}
