//! Filesystem operations behind the injection boundary, so manifest and
//! changeset writes can be captured in memory by tests.

use std::path::Path;

use crate::error::OpsError;

pub trait FsOps {
    fn read_file(&self, path: &Path) -> Result<String, OpsError>;
    fn write_file(&self, path: &Path, content: &str) -> Result<(), OpsError>;
    fn exists(&self, path: &Path) -> bool;
}

/// Production implementation over `std::fs`. Writes create missing parent
/// directories (the changeset directory may not exist yet).
#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl FsOps for LocalFs {
    fn read_file(&self, path: &Path) -> Result<String, OpsError> {
        std::fs::read_to_string(path).map_err(|e| OpsError::ReadFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<(), OpsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OpsError::WriteFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        std::fs::write(path, content).map_err(|e| OpsError::WriteFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/file.txt");
        assert!(!LocalFs.exists(&path));
        LocalFs.write_file(&path, "hello").unwrap();
        assert!(LocalFs.exists(&path));
        assert_eq!(LocalFs.read_file(&path).unwrap(), "hello");
    }

    #[test]
    fn test_read_missing_is_typed_error() {
        let dir = TempDir::new().unwrap();
        let err = LocalFs.read_file(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, OpsError::ReadFile { .. }));
    }
}
