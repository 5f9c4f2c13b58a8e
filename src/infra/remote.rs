//! Remote compilation over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, header::ACCEPT, multipart::Form};
use tracing::{info, warn};

use crate::{
    application::{
        compile::PDF_SIGNATURE,
        remote::{RemoteCompiler, RemoteError},
    },
    domain::types::Engine,
    infra::error::InfraError,
};

/// Posts the document to each endpoint in order until one returns a PDF.
#[derive(Debug, Clone)]
pub struct HttpRemoteCompiler {
    client: Client,
    endpoints: Vec<String>,
}

impl HttpRemoteCompiler {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("remote http client: {err}")))?;
        Ok(Self { client, endpoints })
    }

    async fn compile_at(
        &self,
        endpoint: &str,
        document: &str,
        engine: Engine,
    ) -> Result<Bytes, RemoteError> {
        let failed = |message: String| RemoteError::Endpoint {
            endpoint: endpoint.to_owned(),
            message,
        };

        let form = Form::new()
            .text("fileContents", document.to_owned())
            .text("engine", engine.as_str());
        let response = self
            .client
            .post(endpoint)
            .header(ACCEPT, "application/pdf")
            .multipart(form)
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("unexpected status {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| failed(err.to_string()))?;
        if !body.starts_with(PDF_SIGNATURE) {
            return Err(failed("response is not a PDF document".to_owned()));
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteCompiler for HttpRemoteCompiler {
    async fn compile(&self, document: &str, engine: Engine) -> Result<Bytes, RemoteError> {
        let mut last = None;

        for endpoint in &self.endpoints {
            match self.compile_at(endpoint, document, engine).await {
                Ok(pdf) => {
                    info!(
                        target = "infra::remote",
                        op = "remote::compile",
                        endpoint = %endpoint,
                        engine = engine.as_str(),
                        bytes = pdf.len(),
                        "Remote compiler returned a PDF"
                    );
                    return Ok(pdf);
                }
                Err(err) => {
                    warn!(
                        target = "infra::remote",
                        op = "remote::compile",
                        endpoint = %endpoint,
                        error = %err,
                        "Remote compiler failed; trying next endpoint"
                    );
                    last = Some(err);
                }
            }
        }

        match last {
            Some(last) => Err(RemoteError::Exhausted {
                last: Box::new(last),
            }),
            None => Err(RemoteError::NoEndpoints),
        }
    }
}
