//! Imgur upload client.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::common::HostError;

use super::media::{HostedMedia, ImageHost};

/// Upload endpoint; `/{id}` and `/{deletehash}` below it address one image.
const IMAGE_API: &str = "https://api.imgur.com/3/image";
const PUBLIC_BASE: &str = "https://i.imgur.com";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    data: UploadData,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    id: Option<String>,
    deletehash: Option<String>,
    error: Option<String>,
}

/// Anonymous Imgur uploads authorized by an application client ID.
pub struct ImgurHost {
    client: reqwest::Client,
    api_url: String,
}

impl ImgurHost {
    pub fn new(client_id: &str) -> Result<Self, HostError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Client-ID {}", client_id)).map_err(|e| {
            HostError::UploadFailed {
                name: "client".to_string(),
                message: format!("invalid client ID: {}", e),
            }
        })?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_url: IMAGE_API.to_string(),
        })
    }

    fn image_url(&self, key: &str) -> String {
        format!("{}/{}", self.api_url, key)
    }
}

#[async_trait]
impl ImageHost for ImgurHost {
    async fn upload(&self, name: &str, data: Bytes) -> Result<HostedMedia, HostError> {
        let form = [
            ("image", BASE64.encode(&data)),
            ("type", "base64".to_string()),
            ("name", name.to_string()),
        ];

        let response = self.client.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, "Imgur upload response received");

        if !status.is_success() {
            return Err(HostError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        parse_upload_response(name, &body)
    }

    fn public_url(&self, id: &str) -> String {
        format!("{}/{}", PUBLIC_BASE, id)
    }

    async fn is_live(&self, id: &str) -> Result<bool, HostError> {
        let response = self.client.get(self.image_url(id)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(HostError::Rejected {
                status: status.as_u16(),
                message: response.text().await?,
            });
        }
        Ok(true)
    }

    async fn delete(&self, deletion_token: &str) -> Result<(), HostError> {
        let response = self
            .client
            .delete(self.image_url(deletion_token))
            .send()
            .await?;
        let status = response.status();
        debug!(status = %status, "Imgur delete response received");

        // Already gone counts as deleted
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(HostError::Rejected {
            status: status.as_u16(),
            message: response.text().await?,
        })
    }
}

fn parse_upload_response(name: &str, body: &str) -> Result<HostedMedia, HostError> {
    let failed = |message: String| HostError::UploadFailed {
        name: name.to_string(),
        message,
    };

    let response: UploadResponse =
        serde_json::from_str(body).map_err(|e| failed(format!("unexpected response: {}", e)))?;

    let data = response.data;
    if !response.success {
        return Err(failed(
            data.error.unwrap_or_else(|| "upload was not accepted".to_string()),
        ));
    }
    match (data.id, data.deletehash) {
        (Some(id), Some(deletion_token)) => Ok(HostedMedia { id, deletion_token }),
        _ => Err(failed("response missing id or deletehash".to_string())),
    }
}
