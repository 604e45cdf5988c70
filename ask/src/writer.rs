use crate::activation::ActivationError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Content written to a sibling temp file that has not replaced its target
/// yet. Dropping it without [`StagedWrite::commit`] deletes the temp file.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically renames the temp file onto the target.
    pub fn commit(self) -> Result<(), ActivationError> {
        tracing::debug!(temp = %self.temp_path().display(), "renaming staged artifact");
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|err| ActivationError::ReplaceFailed {
                path: target.clone(),
                source: err.error,
            })?;
        tracing::debug!(path = %target.display(), "artifact replaced");
        Ok(())
    }
}

/// Writes `content` to a new temp file next to `target`, flushed to disk.
///
/// The temp file must live in the target's directory so the later rename
/// stays on one filesystem.
pub fn stage(target: &Path, content: &str) -> Result<StagedWrite, ActivationError> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_failed = |source| ActivationError::WriteFailed {
        path: target.to_path_buf(),
        source,
    };

    let mut temp = tempfile::Builder::new()
        .prefix(&format!(
            ".{}.",
            target
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "ask".to_string())
        ))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(write_failed)?;
    tracing::debug!(temp = %temp.path().display(), "staging artifact");

    temp.write_all(content.as_bytes()).map_err(write_failed)?;
    temp.flush().map_err(write_failed)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(write_failed)?;
    }
    temp.as_file().sync_all().map_err(write_failed)?;

    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

pub fn write_atomic(target: &Path, content: &str) -> Result<(), ActivationError> {
    stage(target, content)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "old\n").unwrap();

        write_atomic(&path, "new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(dir_entries(dir.path()), vec!["config.yaml"]);
    }

    #[test]
    fn staged_temp_lives_next_to_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let staged = stage(&path, "x").unwrap();
        assert_eq!(staged.temp_path().parent(), Some(dir.path()));
        assert!(staged.temp_path().exists());
    }

    #[test]
    fn abandoned_stage_leaves_original_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "original bytes\n").unwrap();

        let staged = stage(&path, "replacement\n").unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());
        drop(staged);

        assert!(!temp_path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "original bytes\n");
        assert_eq!(dir_entries(dir.path()), vec!["config.yaml"]);
    }

    #[test]
    fn failed_rename_is_replace_failed_and_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupant"), "x").unwrap();

        let staged = stage(&path, "replacement\n").unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        let err = staged.commit().unwrap_err();

        assert!(matches!(err, ActivationError::ReplaceFailed { .. }));
        assert!(!temp_path.exists());
        assert_eq!(fs::read_to_string(path.join("occupant")).unwrap(), "x");
    }

    #[test]
    fn missing_directory_is_write_failed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent").join("config.yaml");
        let err = write_atomic(&path, "x").unwrap_err();
        assert!(matches!(err, ActivationError::WriteFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn written_artifact_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_atomic(&path, "secret\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
