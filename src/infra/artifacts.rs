//! Public artifact directory: atomic publication, guarded reads and age-based eviction.

use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::compile::PDF_SIGNATURE;
use crate::domain::entities::Artifact;

#[derive(Debug, Error)]
pub enum ArtifactStorageError {
    #[error("invalid artifact name")]
    InvalidName,
    #[error("artifact not found")]
    NotFound,
    #[error("stored artifact is not a PDF")]
    NotPdf,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Filesystem-backed store for finished PDFs.
#[derive(Debug)]
pub struct ArtifactStorage {
    root: PathBuf,
}

impl ArtifactStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `pdf` into the public directory under the job's artifact name.
    ///
    /// The bytes land in a temporary file first and are renamed into place, so
    /// readers never observe a partially written PDF.
    pub async fn publish(&self, job_id: Uuid, pdf: &Path) -> Result<(String, PathBuf), ArtifactStorageError> {
        let filename = Artifact::filename_for(job_id);
        let target = self.resolve(&filename)?;
        let root = self.root.clone();
        let source = pdf.to_path_buf();
        let destination = target.clone();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(".publish-")
                .suffix(".pdf")
                .tempfile_in(&root)?;
            let mut input = std::fs::File::open(&source)?;
            io::copy(&mut input, staged.as_file_mut())?;
            staged.as_file().sync_all()?;
            persist(staged, &destination)
        })
        .await
        .map_err(|err| io::Error::other(format!("publish task failed: {err}")))??;

        debug!(
            target = "infra::artifacts",
            op = "artifacts::publish",
            filename = %filename,
            "Published artifact"
        );
        Ok((filename, target))
    }

    /// Store PDF bytes obtained elsewhere (e.g. a remote compiler) as the job's artifact.
    pub async fn publish_bytes(&self, job_id: Uuid, data: Bytes) -> Result<(String, PathBuf), ArtifactStorageError> {
        if !data.starts_with(PDF_SIGNATURE) {
            return Err(ArtifactStorageError::NotPdf);
        }
        let filename = Artifact::filename_for(job_id);
        let target = self.resolve(&filename)?;
        let root = self.root.clone();
        let destination = target.clone();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut staged = NamedTempFile::new_in(&root)?;
            io::Write::write_all(staged.as_file_mut(), &data)?;
            staged.as_file().sync_all()?;
            persist(staged, &destination)
        })
        .await
        .map_err(|err| io::Error::other(format!("publish task failed: {err}")))??;

        Ok((filename, target))
    }

    /// Read an artifact, refusing anything that does not carry the PDF signature.
    pub async fn read(&self, filename: &str) -> Result<Bytes, ArtifactStorageError> {
        let absolute = self.resolve(filename)?;
        let data = match fs::read(&absolute).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ArtifactStorageError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };
        if !data.starts_with(PDF_SIGNATURE) {
            return Err(ArtifactStorageError::NotPdf);
        }
        Ok(Bytes::from(data))
    }

    pub async fn exists(&self, filename: &str) -> bool {
        match self.resolve(filename) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove the artifact. Missing files are treated as success.
    pub async fn delete(&self, filename: &str) -> Result<(), ArtifactStorageError> {
        let absolute = self.resolve(filename)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete artifacts whose modification time is older than `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize, io::Error> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if Artifact::job_id_from_filename(name).is_none() {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(
                        target = "infra::artifacts",
                        op = "artifacts::sweep",
                        filename = name,
                        error = %err,
                        "Failed to stat artifact"
                    );
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    target = "infra::artifacts",
                    op = "artifacts::sweep",
                    filename = name,
                    error = %err,
                    "Failed to delete expired artifact"
                ),
            }
        }
        Ok(removed)
    }

    /// Map a client-supplied name onto a path inside the root.
    fn resolve(&self, filename: &str) -> Result<PathBuf, ArtifactStorageError> {
        let name = sanitize_basename(filename).ok_or(ArtifactStorageError::InvalidName)?;
        Ok(self.root.join(name))
    }
}

/// Accepts only a single normal path component ending in `.pdf`.
pub fn sanitize_basename(name: &str) -> Option<&str> {
    if name.is_empty() || name.len() > 128 || name.contains(['/', '\\', '\0']) {
        return None;
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }
    if name.starts_with('.') || !name.to_ascii_lowercase().ends_with(".pdf") {
        return None;
    }
    Some(name)
}

fn persist(staged: NamedTempFile, destination: &Path) -> io::Result<()> {
    staged.persist(destination).map(|_| ()).map_err(|err| err.error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, ArtifactStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = ArtifactStorage::new(dir.path().join("public")).expect("storage");
        (dir, storage)
    }

    #[test]
    fn basename_rejects_traversal_and_non_pdf() {
        assert_eq!(sanitize_basename("document_x.pdf"), Some("document_x.pdf"));
        for bad in [
            "",
            "../secret.pdf",
            "..",
            "a/b.pdf",
            "a\\b.pdf",
            "/etc/passwd",
            ".hidden.pdf",
            "notes.txt",
            "file.pdf\0",
        ] {
            assert_eq!(sanitize_basename(bad), None, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn publishes_and_reads_back() {
        let (dir, storage) = storage();
        let scratch = dir.path().join("document.pdf");
        std::fs::write(&scratch, b"%PDF-1.5 body").expect("write");
        let id = Uuid::new_v4();

        let (filename, path) = storage.publish(id, &scratch).await.expect("publish");
        assert_eq!(filename, Artifact::filename_for(id));
        assert!(path.starts_with(storage.root()));
        assert_eq!(storage.read(&filename).await.expect("read"), Bytes::from_static(b"%PDF-1.5 body"));

        let leftovers: Vec<_> = std::fs::read_dir(storage.root())
            .expect("list")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn rejects_non_pdf_payloads() {
        let (_dir, storage) = storage();
        let err = storage
            .publish_bytes(Uuid::new_v4(), Bytes::from_static(b"<html>"))
            .await
            .expect_err("must reject");
        assert!(matches!(err, ArtifactStorageError::NotPdf));

        std::fs::write(storage.root().join("fake.pdf"), b"not a pdf").expect("write");
        assert!(matches!(
            storage.read("fake.pdf").await,
            Err(ArtifactStorageError::NotPdf)
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected_on_every_path() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.read("../../etc/passwd").await,
            Err(ArtifactStorageError::InvalidName)
        ));
        assert!(matches!(
            storage.delete("../x.pdf").await,
            Err(ArtifactStorageError::InvalidName)
        ));
        assert!(!storage.exists("../x.pdf").await);
    }

    #[tokio::test]
    async fn sweep_removes_only_aged_artifacts() {
        let (_dir, storage) = storage();
        let id = Uuid::new_v4();
        storage
            .publish_bytes(id, Bytes::from_static(b"%PDF-1.4"))
            .await
            .expect("publish");
        std::fs::write(storage.root().join("keep.txt"), b"x").expect("write");

        assert_eq!(storage.sweep(Duration::from_secs(3600)).await.expect("sweep"), 0);
        assert_eq!(storage.sweep(Duration::ZERO).await.expect("sweep"), 1);
        assert!(!storage.exists(&Artifact::filename_for(id)).await);
        assert!(storage.root().join("keep.txt").exists());
    }
}
