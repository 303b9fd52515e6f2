//! Local File Accessor: resolves record paths against the configured root
//! and performs the few filesystem operations a migration needs.

use std::{
    ffi::OsString,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;

pub const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Error)]
pub enum LocalFileError {
    #[error("record has an empty local path")]
    EmptyPath,
    #[error("{op} `{}` failed: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LocalFileError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type LocalFileResult<T> = Result<T, LocalFileError>;

#[derive(Clone, Debug)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths pass through; relative ones are joined to the root.
    pub fn resolve(&self, local_path: &str) -> LocalFileResult<PathBuf> {
        let trimmed = local_path.trim();
        if trimmed.is_empty() {
            return Err(LocalFileError::EmptyPath);
        }
        let path = Path::new(trimmed);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }

    /// `false` for anything that is not a regular file.
    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn read(&self, path: &Path) -> LocalFileResult<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|err| LocalFileError::io("read", path, err))
    }

    /// Open for streaming, with the file length.
    pub async fn open(&self, path: &Path) -> LocalFileResult<(fs::File, u64)> {
        let file = fs::File::open(path)
            .await
            .map_err(|err| LocalFileError::io("open", path, err))?;
        let len = file
            .metadata()
            .await
            .map_err(|err| LocalFileError::io("stat", path, err))?
            .len();
        Ok((file, len))
    }

    /// Copy `path` to `path.backup`, replacing an older backup.
    pub async fn backup(&self, path: &Path) -> LocalFileResult<PathBuf> {
        let target = backup_path(path);
        fs::copy(path, &target)
            .await
            .map_err(|err| LocalFileError::io("backup", path, err))?;
        Ok(target)
    }

    /// Returns `false` when the file was already gone.
    pub async fn delete(&self, path: &Path) -> LocalFileResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(LocalFileError::io("delete", path, err)),
        }
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_root_and_absolute_paths_pass_through() {
        let files = LocalFiles::new("/srv/uploads");
        assert_eq!(
            files.resolve("docs/a.pdf").unwrap(),
            PathBuf::from("/srv/uploads/docs/a.pdf")
        );
        assert_eq!(
            files.resolve("/data/x.pdf").unwrap(),
            PathBuf::from("/data/x.pdf")
        );
        assert!(matches!(files.resolve("  "), Err(LocalFileError::EmptyPath)));
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/data/x.pdf")),
            PathBuf::from("/data/x.pdf.backup")
        );
    }

    #[tokio::test]
    async fn backup_overwrites_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFiles::new(dir.path());
        let source = files.resolve("report.pdf").unwrap();
        tokio::fs::write(&source, b"v1").await.unwrap();
        tokio::fs::write(backup_path(&source), b"stale").await.unwrap();

        let backup = files.backup(&source).await.unwrap();
        assert_eq!(tokio::fs::read(&backup).await.unwrap(), b"v1");
        let (_, len) = files.open(&source).await.unwrap();
        assert_eq!(len, 2);

        assert!(files.delete(&source).await.unwrap());
        assert!(!files.delete(&source).await.unwrap());
        assert!(!files.exists(&source).await);
        assert!(files.exists(&backup).await);
    }
}
