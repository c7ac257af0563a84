//! Checking whether an OCR backend is up.
//!
//! The backend answers `HEAD /` with a bare 200, and `GET /` with a small
//! JSON status message. We try the cheap request first.

use reqwest::Url;
use schemars::JsonSchema;

use crate::prelude::*;

/// The result of probing an OCR backend.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct BackendStatus {
    /// The URL we probed.
    pub url: String,

    /// Did the backend answer with a 2xx status?
    pub reachable: bool,

    /// The HTTP status, if we got one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    /// The backend's status message, or what went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The backend's answer to `GET /`.
#[derive(Debug, Deserialize)]
struct RootResponse {
    status: String,
}

/// The root of the server hosting an OCR endpoint.
pub fn backend_root(ocr_url: &str) -> Result<Url> {
    let mut url = Url::parse(ocr_url)
        .with_context(|| format!("Invalid OCR backend URL: {:?}", ocr_url))?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("OCR backend URL has no host: {:?}", ocr_url));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Probe the backend that serves `ocr_url`.
#[instrument(level = "debug", skip(client))]
pub async fn check_backend(client: &reqwest::Client, ocr_url: &str) -> Result<BackendStatus> {
    let root = backend_root(ocr_url)?;
    let mut status = BackendStatus {
        url: root.to_string(),
        reachable: false,
        http_status: None,
        message: None,
    };

    let head = match client.head(root.clone()).send().await {
        Ok(head) => head,
        Err(err) => {
            // Keep the cause, e.g. "Connection refused".
            status.message = Some(format!("{:#}", anyhow::Error::from(err)));
            return Ok(status);
        }
    };
    status.http_status = Some(head.status().as_u16());
    if !head.status().is_success() {
        status.message = Some(head.status().to_string());
        return Ok(status);
    }
    status.reachable = true;

    // The status message is a nicety. Don't fail the check over it.
    match client.get(root).send().await {
        Ok(response) if response.status().is_success() => {
            match response.json::<RootResponse>().await {
                Ok(root_response) => status.message = Some(root_response.status),
                Err(err) => debug!("Backend root did not return a status message: {err}"),
            }
        }
        Ok(response) => debug!("GET / returned {}", response.status()),
        Err(err) => debug!("GET / failed: {err}"),
    }
    Ok(status)
}
