//! Owner-only temporary script files.
//!
//! Script bodies are written to a file in the OS temp directory with `0600`
//! permissions and removed when the [`TempScript`] guard drops, on every exit
//! path including panics and cancellation.

use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TempFileError {
    #[error("temp file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("refusing to remove '{0}': not inside the OS temp directory")]
    OutsideTempDir(PathBuf),
}

/// A script file that is deleted on drop.
#[derive(Debug)]
pub struct TempScript {
    path: PathBuf,
}

impl TempScript {
    /// Write `contents` to a fresh owner-only file ending in `suffix`.
    pub fn create(contents: &str, suffix: &str) -> Result<Self, TempFileError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stepflow-script-").suffix(suffix);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o600));
        }

        let mut file = builder.tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        let (_file, path) = file.keep().map_err(|e| TempFileError::Io(e.error))?;

        tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote temp script");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if let Err(e) = cleanup_temp_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp script");
        }
    }
}

/// Remove `path` if it lives inside the OS temp directory.
///
/// A missing file is not an error. Paths outside the temp directory are
/// refused without touching them.
pub fn cleanup_temp_file(path: &Path) -> Result<(), TempFileError> {
    let temp_root = std::env::temp_dir();
    let temp_root = temp_root.canonicalize().unwrap_or(temp_root);

    let Some(parent) = path.parent() else {
        return Err(TempFileError::OutsideTempDir(path.to_path_buf()));
    };
    if path.file_name().is_none() {
        return Err(TempFileError::OutsideTempDir(path.to_path_buf()));
    }
    let parent = match parent.canonicalize() {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !parent.starts_with(&temp_root) {
        return Err(TempFileError::OutsideTempDir(path.to_path_buf()));
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_writes_and_removes_file() {
        let script = TempScript::create("echo hi\n", ".sh").unwrap();
        let path = script.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo hi\n");
        assert!(path.file_name().unwrap().to_string_lossy().ends_with(".sh"));

        drop(script);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let script = TempScript::create("true\n", ".sh").unwrap();
        let mode = std::fs::metadata(script.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn cleanup_is_idempotent_inside_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, "echo").unwrap();

        cleanup_temp_file(&path).unwrap();
        assert!(!path.exists());
        cleanup_temp_file(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_refuses_paths_outside_temp_dir() {
        let err = cleanup_temp_file(Path::new("/etc/hostname")).unwrap_err();
        assert!(matches!(err, TempFileError::OutsideTempDir(_)));
        assert!(matches!(
            cleanup_temp_file(Path::new("/")),
            Err(TempFileError::OutsideTempDir(_))
        ));
    }
}
