//! Filesystem content store: serves files under a root and reports their
//! modification times to the cache filter.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs;

use crate::cache::{ContentError, LastModifiedSource};

const INDEX_FILE: &str = "index.html";

/// Content rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the file behind a request path. Directories resolve to their
    /// `index.html`; missing files yield `Ok(None)`.
    pub async fn read(&self, resource: &str) -> Result<Option<Bytes>, ContentError> {
        let Some(path) = self.locate(resource).await? else {
            return Ok(None);
        };
        match fs::read(&path).await {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ContentError::Io(err)),
        }
    }

    async fn locate(&self, resource: &str) -> Result<Option<PathBuf>, ContentError> {
        let path = self.resolve(resource)?;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ContentError::Io(err)),
        };
        if metadata.is_dir() {
            return Ok(Some(path.join(INDEX_FILE)));
        }
        Ok(Some(path))
    }

    fn resolve(&self, resource: &str) -> Result<PathBuf, ContentError> {
        let relative = Path::new(resource.trim_start_matches('/'));
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ContentError::InvalidPath(resource.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl LastModifiedSource for FsContentStore {
    async fn last_modified(&self, resource: &str) -> Result<Option<OffsetDateTime>, ContentError> {
        let Some(path) = self.locate(resource).await? else {
            return Ok(None);
        };
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ContentError::Io(err)),
        };
        let modified = metadata.modified()?;
        Ok(Some(OffsetDateTime::from(modified)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(files: &[(&str, &str)]) -> (tempfile::TempDir, FsContentStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create parent");
            }
            std::fs::write(path, contents).expect("write file");
        }
        let store = FsContentStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn reads_files_and_directory_indexes() {
        let (_dir, store) = store_with(&[("p/index.html", "<p>hi</p>"), ("a.css", "body{}")]);

        let css = store.read("/a.css").await.expect("read").expect("present");
        assert_eq!(&css[..], b"body{}");

        let index = store.read("/p/").await.expect("read").expect("present");
        assert_eq!(&index[..], b"<p>hi</p>");
    }

    #[tokio::test]
    async fn missing_resources_are_absent_not_errors() {
        let (_dir, store) = store_with(&[]);
        assert!(store.read("/nope.html").await.expect("read").is_none());
        assert!(
            store
                .last_modified("/nope.html")
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn reports_file_modification_time() {
        let (_dir, store) = store_with(&[("a.html", "x")]);
        let modified = store
            .last_modified("/a.html")
            .await
            .expect("lookup")
            .expect("timestamp");
        assert!(modified > OffsetDateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let (_dir, store) = store_with(&[]);
        let err = store.read("/../etc/passwd").await.expect_err("traversal");
        assert!(matches!(err, ContentError::InvalidPath(_)));
        let err = store
            .last_modified("/p/../../secret")
            .await
            .expect_err("traversal");
        assert!(matches!(err, ContentError::InvalidPath(_)));
    }
}
