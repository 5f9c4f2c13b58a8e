//! Domain entities for compilation requests, jobs and their artifacts.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    error::DomainError,
    types::{BibliographyTool, Engine, JobOrigin, JobStatus},
};

pub const DEFAULT_PASSES: u8 = 3;
pub const MAX_PASSES: u8 = 5;

const ARTIFACT_PREFIX: &str = "document_";
const ARTIFACT_SUFFIX: &str = ".pdf";

static TEX_DIMENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(\.\d+)?\s*(pt|mm|cm|in|bp|pc|dd|cc|sp|em|ex)$").expect("valid regex")
});
static PAPER_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{1,16}paper$").expect("valid regex"));

/// Page margins, each a TeX dimension such as `1in` or `2.5cm`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Margins {
    pub top: Option<String>,
    pub right: Option<String>,
    pub bottom: Option<String>,
    pub left: Option<String>,
}

impl Margins {
    pub fn is_empty(&self) -> bool {
        self.sides().all(|(_, value)| value.is_none())
    }

    pub fn sides(&self) -> impl Iterator<Item = (&'static str, Option<&str>)> {
        [
            ("top", self.top.as_deref()),
            ("right", self.right.as_deref()),
            ("bottom", self.bottom.as_deref()),
            ("left", self.left.as_deref()),
        ]
        .into_iter()
    }

    fn validate(&self) -> Result<(), DomainError> {
        for (side, value) in self.sides() {
            if let Some(value) = value
                && !TEX_DIMENSION.is_match(value.trim())
            {
                return Err(DomainError::validation(format!(
                    "margin `{side}` must be a TeX dimension such as `1in` or `2cm`"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    pub timeout_ms: u64,
    pub passes: u8,
    pub paper_size: Option<String>,
    pub margins: Option<Margins>,
}

/// Bounds applied to incoming requests; derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_source_bytes: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub default_passes: u8,
}

/// Immutable description of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilationRequest {
    pub source: String,
    pub engine: Engine,
    pub bibliography: Option<String>,
    pub use_biber: bool,
    pub options: CompileOptions,
}

impl CompilationRequest {
    /// Check the request against `limits`, filling defaults and clamping the pass count.
    pub fn validated(mut self, limits: &RequestLimits) -> Result<Self, DomainError> {
        if self.source.trim().is_empty() {
            return Err(DomainError::validation("LaTeX source is required"));
        }
        if self.source.len() > limits.max_source_bytes {
            return Err(DomainError::validation(format!(
                "LaTeX source exceeds the {} byte limit",
                limits.max_source_bytes
            )));
        }
        if !self.source.contains("\\documentclass") {
            return Err(DomainError::validation(
                "LaTeX source must contain \\documentclass",
            ));
        }
        if let Some(bib) = self.bibliography.as_ref() {
            if bib.len() > limits.max_source_bytes {
                return Err(DomainError::validation(format!(
                    "bibliography exceeds the {} byte limit",
                    limits.max_source_bytes
                )));
            }
            if bib.trim().is_empty() {
                self.bibliography = None;
            }
        }

        if self.options.timeout_ms == 0 {
            self.options.timeout_ms = limits.default_timeout_ms;
        }
        if self.options.timeout_ms > limits.max_timeout_ms {
            return Err(DomainError::validation(format!(
                "timeoutMs must not exceed {}",
                limits.max_timeout_ms
            )));
        }
        if self.options.passes == 0 {
            self.options.passes = limits.default_passes;
        }
        self.options.passes = self.options.passes.clamp(1, MAX_PASSES);

        if let Some(paper) = self.options.paper_size.as_ref() {
            let paper = paper.trim().to_ascii_lowercase();
            if !PAPER_SIZE.is_match(&paper) {
                return Err(DomainError::validation(
                    "paperSize must look like `a4paper` or `letterpaper`",
                ));
            }
            self.options.paper_size = Some(paper);
        }
        if let Some(margins) = self.options.margins.as_ref() {
            margins.validate()?;
            if margins.is_empty() {
                self.options.margins = None;
            }
        }

        Ok(self)
    }

    pub fn bibliography_tool(&self) -> Option<BibliographyTool> {
        self.bibliography.as_ref().map(|_| {
            if self.use_biber {
                BibliographyTool::Biber
            } else {
                BibliographyTool::Bibtex
            }
        })
    }
}

/// A compiled PDF, owned by the job that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    pub preview_token: String,
    pub created_at: OffsetDateTime,
    pub remote: bool,
}

impl Artifact {
    pub fn filename_for(job_id: Uuid) -> String {
        format!("{ARTIFACT_PREFIX}{}{ARTIFACT_SUFFIX}", job_id.as_simple())
    }

    /// Recover the owning job id from a public artifact filename.
    pub fn job_id_from_filename(filename: &str) -> Option<Uuid> {
        let stem = filename
            .strip_prefix(ARTIFACT_PREFIX)?
            .strip_suffix(ARTIFACT_SUFFIX)?;
        Uuid::try_parse(stem).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub cache_key: u64,
    pub status: JobStatus,
    pub origin: JobOrigin,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub artifact: Option<Artifact>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Job {
    pub fn new(id: Uuid, cache_key: u64, origin: JobOrigin, now: OffsetDateTime) -> Self {
        Self {
            id,
            cache_key,
            status: JobStatus::Pending,
            origin,
            logs: Vec::new(),
            error: None,
            artifact: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start(&mut self, now: OffsetDateTime) -> Result<(), DomainError> {
        self.transition(JobStatus::Running, now)
    }

    /// Attach the artifact and mark the job completed in one step.
    pub fn complete(&mut self, artifact: Artifact, now: OffsetDateTime) -> Result<(), DomainError> {
        self.transition(JobStatus::Completed, now)?;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: OffsetDateTime) -> Result<(), DomainError> {
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(message.into());
        Ok(())
    }

    pub fn append_logs<I>(&mut self, lines: I, now: OffsetDateTime)
    where
        I: IntoIterator<Item = String>,
    {
        self.logs.extend(lines);
        self.updated_at = now;
    }

    fn transition(&mut self, next: JobStatus, now: OffsetDateTime) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
