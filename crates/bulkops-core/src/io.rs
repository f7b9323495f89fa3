//! Writes under `.bulkops/`.
//!
//! The server re-reads the catalog on every lookup, so files are replaced via
//! a temp file and rename; a reader sees the old content or the new, never a
//! mix.

use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `data`, creating parent directories as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// `true` when the file was created; an existing file is left untouched.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, data)?;
    Ok(true)
}

/// Install an action script unless one is already there. New scripts are
/// made executable on unix.
pub fn install_script(path: &Path, body: &str) -> Result<bool> {
    if !write_if_missing(path, body.as_bytes())? {
        return Ok(false);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        atomic_write(&path, b"version: 1").unwrap();
        atomic_write(&path, b"version: 2").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "version: 2");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".bulkops/actions/cleanup.sh");
        atomic_write(&path, b"#!/bin/sh\n").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn write_if_missing_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.yaml");
        assert!(write_if_missing(&path, b"projects: []").unwrap());
        assert!(!write_if_missing(&path, b"projects: [x]").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "projects: []");
    }

    #[cfg(unix)]
    #[test]
    fn installed_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refresh.sh");
        assert!(install_script(&path, "#!/bin/sh\necho '{}'\n").unwrap());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(!install_script(&path, "#!/bin/sh\n").unwrap());
    }
}
