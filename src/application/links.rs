//! Public URL shapes handed out to clients.

use uuid::Uuid;

pub const PREVIEW_PREFIX: &str = "/api/v1/preview/";

pub fn status_url(job_id: Uuid) -> String {
    format!("/api/v1/jobs/{job_id}")
}

pub fn preview_url(filename: &str, token: &str) -> String {
    format!("{PREVIEW_PREFIX}{filename}?token={token}")
}

/// Extract the artifact filename from a URL produced by [`preview_url`].
pub fn filename_from_preview_url(url: &str) -> Option<&str> {
    let rest = url.strip_prefix(PREVIEW_PREFIX)?;
    let filename = rest.split_once('?').map_or(rest, |(name, _)| name);
    (!filename.is_empty()).then_some(filename)
}
