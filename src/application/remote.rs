//! Hosted compilers used when no local TeX toolchain is installed.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::types::Engine;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no remote compiler endpoints are configured")]
    NoEndpoints,
    #[error("remote compiler `{endpoint}` failed: {message}")]
    Endpoint { endpoint: String, message: String },
    #[error("every remote compiler endpoint failed; last error: {last}")]
    Exhausted { last: Box<RemoteError> },
}

#[async_trait]
pub trait RemoteCompiler: Send + Sync {
    /// Compile `document` and return the PDF bytes, which must start with `%PDF-`.
    async fn compile(&self, document: &str, engine: Engine) -> Result<Bytes, RemoteError>;
}
