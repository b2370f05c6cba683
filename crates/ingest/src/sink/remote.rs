//! HTTP sink for a remote report analyzer.

use super::{Sink, SinkError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use resultsync_bundle_schema::{IdentifierSnapshot, UploadReport};
use std::time::Duration;
use tracing::debug;

const IDENTIFIERS_ROUTE: &str = "testReportIdentifiers";
const UPLOAD_ROUTE: &str = "uploadReport";

/// Uploads bundles to a remote analyzer API.
///
/// Routes, relative to the API root:
/// - `GET testReportIdentifiers` returns a JSON array of identifiers.
/// - `POST uploadReport` takes an [`UploadReport`] JSON body.
pub struct RemoteSink {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    max_payload_bytes: u64,
}

impl RemoteSink {
    pub fn new(
        base_url: &str,
        username: Option<String>,
        password: Option<String>,
        max_payload_bytes: u64,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            max_payload_bytes,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::from_status(status.as_u16(), body))
    }
}

fn transport(e: reqwest::Error) -> SinkError {
    SinkError::Transport(e.to_string())
}

#[async_trait]
impl Sink for RemoteSink {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError> {
        let response = self
            .authorize(self.client.get(self.url(IDENTIFIERS_ROUTE)))
            .send()
            .await
            .map_err(transport)?;

        Self::check(response)
            .await?
            .json::<IdentifierSnapshot>()
            .await
            .map_err(transport)
    }

    async fn upload(&self, report: &UploadReport) -> Result<(), SinkError> {
        let body =
            serde_json::to_vec(report).map_err(|e| SinkError::InvalidPayload(e.to_string()))?;

        let size = body.len() as u64;
        if size > self.max_payload_bytes {
            return Err(SinkError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        debug!(
            identifier = report.identifier().unwrap_or("?"),
            size, "Posting report"
        );

        let response = self
            .authorize(self.client.post(self.url(UPLOAD_ROUTE)))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        Self::check(response).await?;
        Ok(())
    }
}
