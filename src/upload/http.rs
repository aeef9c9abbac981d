//! Presigned-URL upload client.

use super::MediaStore;
use crate::error::UploadError;
use crate::{Error, Result};
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, ORIGIN};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignRequest<'a> {
    filename: &'a str,
    total_bytes: usize,
    media_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignResponse {
    /// Signed URL for the PUT.
    url: String,
    /// Where the object is served from afterwards.
    public_url: String,
}

/// Uploads through `POST {base}/v1/media/presigned-url` followed by a PUT
/// to the returned location.
pub struct HttpMediaStore {
    client: Client,
    base_url: String,
    origin: Option<String>,
}

impl HttpMediaStore {
    pub fn new(client: Client, base_url: &str, origin: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            origin,
        }
    }

    async fn presign(&self, filename: &str, size: usize, media_type: &str) -> Result<PresignResponse> {
        let location = |reason: String| Error::upload(filename, UploadError::Location(reason));

        let response = self
            .client
            .post(format!("{}/v1/media/presigned-url", self.base_url))
            .json(&PresignRequest {
                filename,
                total_bytes: size,
                media_type,
            })
            .send()
            .await
            .map_err(|e| location(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(location(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        response
            .json::<PresignResponse>()
            .await
            .map_err(|e| location(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MediaStore for HttpMediaStore {
    async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        content_type: &str,
        media_type: &str,
    ) -> Result<String> {
        let presigned = self.presign(filename, data.len(), media_type).await?;

        // The signature covers these headers; they must match exactly.
        let mut request = self
            .client
            .put(&presigned.url)
            .header(CONTENT_TYPE, content_type)
            .header("x-amz-acl", "public-read");
        if let Some(origin) = &self.origin {
            request = request.header(ORIGIN, origin);
        }

        let response = request.body(data).send().await.map_err(|e| {
            Error::upload(
                filename,
                UploadError::Transfer {
                    status: 0,
                    body: e.to_string(),
                },
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upload(
                filename,
                UploadError::Transfer {
                    status: status.as_u16(),
                    body,
                },
            ));
        }

        tracing::debug!(file = filename, url = %presigned.public_url, "Uploaded");
        Ok(presigned.public_url)
    }
}
