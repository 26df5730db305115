//! Filesystem supplier with traversal protection.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{RequestOptions, Source, SourceDescriptor};
use crate::error::IpxError;

/// Characters that never appear in a legitimate resolved path.
const INVALID_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Serves ids from a root directory. Every resolved path must stay under
/// the root; `..` escapes and reserved characters are rejected before any
/// filesystem access.
#[derive(Debug)]
pub struct FilesystemSource {
    root: PathBuf,
    max_age: u64,
}

impl FilesystemSource {
    pub fn new(dir: &Path, max_age: u64) -> Self {
        // Canonicalize once so the containment check compares real paths.
        let root = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        Self { root, max_age }
    }

    fn resolve_path(&self, id: &str) -> Result<PathBuf, IpxError> {
        let fs_path = lexical_join(&self.root, id);

        if contains_invalid_chars(&fs_path) {
            return Err(IpxError::forbidden("Forbidden path"));
        }

        if !fs_path.starts_with(&self.root) {
            return Err(IpxError::forbidden("Forbidden path"));
        }

        Ok(fs_path)
    }
}

#[async_trait]
impl Source for FilesystemSource {
    async fn resolve(
        &self,
        id: &str,
        _options: &RequestOptions,
    ) -> Result<SourceDescriptor, IpxError> {
        let fs_path = self.resolve_path(id)?;

        let metadata = tokio::fs::metadata(&fs_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                IpxError::not_found("File not found")
            } else {
                IpxError::forbidden(format!("File access error {}", err.kind()))
            }
        })?;

        if !metadata.is_file() {
            return Err(IpxError::bad_request("Path should be a file"));
        }

        let mtime = metadata.modified().ok().map(DateTime::<Utc>::from);

        debug!(path = %fs_path.display(), "Resolved filesystem source");

        let read_path = fs_path.clone();
        Ok(SourceDescriptor::new(
            mtime,
            Some(self.max_age),
            async move {
                tokio::fs::read(&read_path)
                    .await
                    .map(Bytes::from)
                    .map_err(|err| {
                        IpxError::internal(format!(
                            "Failed to read {}: {err}",
                            read_path.display()
                        ))
                    })
            },
        ))
    }
}

/// Joins an id under the root, folding `.` and `..` lexically so the
/// containment check sees the path the read would actually touch.
fn lexical_join(root: &Path, id: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in Path::new(id.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::ParentDir => {
                path.pop();
            }
            Component::CurDir => {}
            // Absolute prefixes in the id cannot restart the path.
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    path
}

fn contains_invalid_chars(path: &Path) -> bool {
    let text = path.to_string_lossy();
    // On Windows the drive-root prefix legitimately carries a colon.
    #[cfg(windows)]
    let text = text
        .get(2..)
        .map(std::borrow::Cow::Borrowed)
        .unwrap_or(text);
    text.contains(INVALID_PATH_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn source(temp: &TempDir) -> FilesystemSource {
        FilesystemSource::new(temp.path(), 300)
    }

    #[tokio::test]
    async fn test_resolves_existing_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("logo.png"), b"png bytes").unwrap();

        let descriptor = source(&temp)
            .resolve("/logo.png", &RequestOptions::default())
            .await
            .unwrap();

        assert!(descriptor.mtime.is_some());
        assert_eq!(descriptor.max_age, Some(300));
        assert_eq!(descriptor.data().await.unwrap(), Bytes::from_static(b"png bytes"));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let err = source(&temp)
            .resolve("/../etc/passwd", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::forbidden("Forbidden path"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_characters() {
        let temp = TempDir::new().unwrap();
        let err = source(&temp)
            .resolve("/logo|x.png", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::forbidden("Forbidden path"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = source(&temp)
            .resolve("/missing.png", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::not_found("File not found"));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("gallery")).unwrap();
        let err = source(&temp)
            .resolve("/gallery", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::bad_request("Path should be a file"));
    }

    #[test]
    fn test_nested_traversal_stays_inside_root() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("a")).unwrap();
        let src = source(&temp);
        // a/../logo.png resolves inside the root and is allowed.
        let resolved = src.resolve_path("/a/../logo.png").unwrap();
        assert!(resolved.starts_with(src.root.as_path()));
        // One level above the root is not.
        assert!(src.resolve_path("/a/../../outside.png").is_err());
    }
}
