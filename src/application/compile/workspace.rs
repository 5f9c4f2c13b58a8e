//! Private per-job scratch directory holding sources and compiler byproducts.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::warn;
use uuid::Uuid;

pub const JOB_NAME: &str = "document";
pub const TEX_FILE: &str = "document.tex";
pub const BIB_FILE: &str = "references.bib";
pub const PDF_FILE: &str = "document.pdf";

#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create `<scratch_root>/job_<id>/` and write the document (and bibliography).
    pub async fn create(
        scratch_root: &Path,
        job_id: Uuid,
        document: &str,
        bibliography: Option<&str>,
    ) -> io::Result<Self> {
        let dir = scratch_root.join(directory_name(job_id));
        fs::create_dir_all(&dir).await?;
        let workspace = Self { dir };

        match workspace.write_sources(document, bibliography).await {
            Ok(()) => Ok(workspace),
            Err(err) => {
                workspace.remove().await;
                Err(err)
            }
        }
    }

    async fn write_sources(&self, document: &str, bibliography: Option<&str>) -> io::Result<()> {
        fs::write(self.dir.join(TEX_FILE), document).await?;
        if let Some(bib) = bibliography {
            fs::write(self.dir.join(BIB_FILE), bib).await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.dir.join(PDF_FILE)
    }

    /// Remove the directory and every intermediate file in it.
    pub async fn remove(self) {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "application::compile::workspace",
                path = %self.dir.display(),
                error = %err,
                "Failed to remove job workspace"
            ),
        }
    }
}

/// Job ids are UUIDs; the simple form contains only hex digits.
pub fn directory_name(job_id: Uuid) -> String {
    format!("job_{}", job_id.as_simple())
}
