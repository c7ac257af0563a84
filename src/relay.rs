//! The request relay.
//!
//! A relay takes one [`TaskDescriptor`], POSTs its two images to the OCR
//! backend, and reports back through a channel. The caller receives an
//! optional [`Outcome::Info`] followed by exactly one terminal outcome,
//! either [`Outcome::Success`] or [`Outcome::Error`], and then the channel
//! closes.
//!
//! Nothing here retries, times out or validates images. The backend decides
//! what a good image is, and we pass its verdict along.

use std::{error, fmt};

use futures::{SinkExt as _, channel::mpsc};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use schemars::JsonSchema;

use crate::{async_utils::JoinWorker, data_url::describe_payload, prelude::*};

/// The message we announce before submitting a task.
pub const SUBMITTING_MESSAGE: &str = "Submitting images to OCR backend...";

/// Everything needed to run one relay.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// The full URL of the OCR endpoint, e.g. `https://host/ocr`.
    pub ocr_backend_url: String,

    /// The first (front) image, Base64-encoded. May be a `data:` URL.
    pub photo1_base64: String,

    /// The second (back) image, Base64-encoded. May be empty.
    pub photo2_base64: String,
}

/// The JSON body we send to the OCR backend.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest<'a> {
    base64_image1: &'a str,
    base64_image2: &'a str,
}

/// A message from the relay to its caller.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Progress notification. Purely informational.
    Info { message: String },

    /// The decoded response body from the backend.
    Success { data: Value },

    /// A human-readable description of what went wrong.
    Error { message: String },
}

impl Outcome {
    /// Is this the last outcome of a relay?
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Info { .. })
    }

    /// Is this an error?
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }
}

impl From<RelayError> for Outcome {
    fn from(err: RelayError) -> Self {
        Outcome::Error {
            message: err.to_string(),
        }
    }
}

/// Options controlling what a relay reports.
#[derive(Clone, Copy, Debug)]
pub struct RelayOptions {
    /// Send an [`Outcome::Info`] before submitting.
    pub emit_info: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self { emit_info: true }
    }
}

/// Ways a relay can fail.
#[derive(Debug)]
pub enum RelayError {
    /// The backend answered with a non-2xx status.
    Backend {
        /// The HTTP status.
        status: StatusCode,
        /// The backend's `detail`, or the status text if it gave none.
        message: String,
    },

    /// We couldn't talk to the backend, or couldn't read its response.
    Transport(reqwest::Error),

    /// The backend claimed success, but its body wasn't JSON.
    Decode(serde_json::Error),
}

impl RelayError {
    /// The HTTP status, if the backend answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RelayError::Backend { status, .. } => Some(*status),
            RelayError::Transport(err) => err.status(),
            RelayError::Decode(_) => None,
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Backend { message, .. } => write!(f, "Request failed: {message}"),
            RelayError::Transport(err) => {
                // `reqwest` keeps the interesting part ("connection refused")
                // in its source chain.
                write!(f, "{err}")?;
                let mut source = error::Error::source(err);
                while let Some(cause) = source {
                    write!(f, ": {cause}")?;
                    source = error::Error::source(cause);
                }
                Ok(())
            }
            RelayError::Decode(err) => write!(f, "Invalid JSON in OCR response: {err}"),
        }
    }
}

impl error::Error for RelayError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RelayError::Backend { .. } => None,
            RelayError::Transport(err) => Some(err),
            RelayError::Decode(err) => Some(err),
        }
    }
}

/// Build the message for a failed response from its status and raw body.
///
/// A non-blank string `detail` is used as-is. Any other non-null `detail`
/// (FastAPI sends a list for validation errors) is rendered as compact JSON.
/// Without a usable `detail`, we fall back to the status text.
fn backend_error_message(status: StatusCode, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|body| body.get("detail").cloned());
    match detail {
        Some(Value::String(detail)) if !detail.trim().is_empty() => detail,
        Some(Value::String(_)) => status_text(status),
        Some(detail) if !detail.is_null() => detail.to_string(),
        _ => status_text(status),
    }
}

/// The status code and reason phrase, e.g. `"500 Internal Server Error"`.
fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// Send one request and decode the response.
async fn post_task(
    client: &reqwest::Client,
    task: &TaskDescriptor,
) -> Result<Value, RelayError> {
    let body = OcrRequest {
        base64_image1: &task.photo1_base64,
        base64_image2: &task.photo2_base64,
    };
    let response = client
        .post(&task.ocr_backend_url)
        .header(CONTENT_TYPE, "application/json")
        .json(&body)
        .send()
        .await
        .map_err(RelayError::Transport)?;

    let status = response.status();
    if !status.is_success() {
        // An unreadable error body is no worse than one without `detail`.
        let bytes = response.bytes().await.unwrap_or_else(|err| {
            debug!(%status, "Could not read OCR error body: {err}");
            Default::default()
        });
        return Err(RelayError::Backend {
            status,
            message: backend_error_message(status, &bytes),
        });
    }
    let bytes = response.bytes().await.map_err(RelayError::Transport)?;
    debug!(%status, body_len = bytes.len(), "OCR backend responded");
    serde_json::from_slice::<Value>(&bytes).map_err(RelayError::Decode)
}

/// Run one task, sending its outcomes to `outcomes`.
///
/// This returns an error only if the caller stopped listening. Failures of
/// the request itself are reported as [`Outcome::Error`].
#[instrument(level = "debug", skip_all, fields(url = %task.ocr_backend_url))]
pub async fn relay_task(
    client: &reqwest::Client,
    task: &TaskDescriptor,
    options: RelayOptions,
    outcomes: &mut mpsc::Sender<Outcome>,
) -> Result<()> {
    debug!(
        image1 = %describe_payload(&task.photo1_base64),
        image2 = %describe_payload(&task.photo2_base64),
        "Relaying OCR task"
    );
    if options.emit_info {
        outcomes
            .send(Outcome::Info {
                message: SUBMITTING_MESSAGE.to_owned(),
            })
            .await
            .context("relay caller hung up before info")?;
    }

    let outcome = match post_task(client, task).await {
        Ok(data) => Outcome::Success { data },
        Err(err) => {
            warn!(status = ?err.status(), "OCR request failed: {err}");
            Outcome::from(err)
        }
    };
    outcomes
        .send(outcome)
        .await
        .context("relay caller hung up before result")?;
    Ok(())
}

/// A relay running in the background.
pub struct RelayHandle {
    /// Outcomes, in the order they were emitted. Closes after the terminal
    /// outcome.
    pub outcomes: mpsc::Receiver<Outcome>,

    /// The background task.
    pub worker: JoinWorker,
}

/// Run [`relay_task`] on a background task.
pub fn spawn_relay(
    client: reqwest::Client,
    task: TaskDescriptor,
    options: RelayOptions,
) -> RelayHandle {
    // Room for both outcomes, so the relay never waits on a slow caller.
    let (mut tx, rx) = mpsc::channel(2);
    let handle = tokio::spawn(async move {
        relay_task(&client, &task, options, &mut tx).await
    });
    RelayHandle {
        outcomes: rx,
        worker: JoinWorker::from_handle(handle),
    }
}

/// Create an HTTP client for talking to OCR backends.
pub fn create_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}


#[cfg(test)]
mod tests {
    use futures::StreamExt as _;
    use serde_json::json;

    use super::{test_backend::*, *};

    fn task(url: String, image1: &str, image2: &str) -> TaskDescriptor {
        TaskDescriptor {
            ocr_backend_url: url,
            photo1_base64: image1.to_owned(),
            photo2_base64: image2.to_owned(),
        }
    }

    /// Run a relay to completion and collect everything it said.
    async fn run(task: TaskDescriptor, options: RelayOptions) -> Vec<Outcome> {
        let client = create_http_client().unwrap();
        let RelayHandle { outcomes, worker } = spawn_relay(client, task, options);
        let outcomes = outcomes.collect::<Vec<_>>().await;
        worker.join().await.unwrap();
        outcomes
    }

    fn terminal(outcomes: &[Outcome]) -> &Outcome {
        let terminals = outcomes.iter().filter(|o| o.is_terminal()).collect::<Vec<_>>();
        assert_eq!(terminals.len(), 1, "expected one terminal outcome: {outcomes:?}");
        terminals[0]
    }

    #[tokio::test]
    async fn test_success_relays_data() {
        let backend = TestBackend::start(200, r#"{"text":"ABC"}"#).await;
        let outcomes = run(task(backend.url(), "aaa", "bbb"), RelayOptions::default()).await;
        assert_eq!(
            outcomes,
            vec![
                Outcome::Info {
                    message: SUBMITTING_MESSAGE.to_owned()
                },
                Outcome::Success {
                    data: json!({"text": "ABC"})
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_request_body_and_header() {
        let backend = TestBackend::start(200, "{}").await;
        run(task(backend.url(), "", ""), RelayOptions::default()).await;
        assert_eq!(
            backend.last_body(),
            Some(json!({"base64Image1": "", "base64Image2": ""}))
        );
        assert_eq!(backend.last_content_type().as_deref(), Some("application/json"));

        run(
            task(backend.url(), "data:image/png;base64,AAAA", "QkJC"),
            RelayOptions::default(),
        )
        .await;
        assert_eq!(
            backend.last_body(),
            Some(json!({
                "base64Image1": "data:image/png;base64,AAAA",
                "base64Image2": "QkJC",
            }))
        );
    }

    #[tokio::test]
    async fn test_backend_detail_becomes_message() {
        let backend = TestBackend::start(422, r#"{"detail":"bad image"}"#).await;
        let outcomes = run(task(backend.url(), "a", "b"), RelayOptions::default()).await;
        assert_eq!(
            terminal(&outcomes),
            &Outcome::Error {
                message: "Request failed: bad image".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_non_json_error_uses_status_text() {
        let backend = TestBackend::start(500, "<html>oops</html>").await;
        let outcomes = run(task(backend.url(), "a", "b"), RelayOptions::default()).await;
        match terminal(&outcomes) {
            Outcome::Error { message } => {
                assert!(message.contains("500"), "{message}");
                assert!(message.contains("Internal Server Error"), "{message}");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_error_without_detail_uses_status_text() {
        let backend = TestBackend::start(502, r#"{"error":"upstream"}"#).await;
        let outcomes = run(task(backend.url(), "a", "b"), RelayOptions::default()).await;
        assert_eq!(
            terminal(&outcomes),
            &Outcome::Error {
                message: "Request failed: 502 Bad Gateway".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_truncated_error_body_uses_status_text() {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        // Promise 100 bytes of body, send 5, then hang up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\n\r\n{\"det",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let outcomes = run(
            task(format!("http://{addr}/ocr"), "a", "b"),
            RelayOptions { emit_info: false },
        )
        .await;
        assert_eq!(
            outcomes,
            vec![Outcome::Error {
                message: "Request failed: 500 Internal Server Error".to_owned()
            }]
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let url = unreachable_url().await;
        let outcomes = run(task(url, "a", "b"), RelayOptions::default()).await;
        match terminal(&outcomes) {
            Outcome::Error { message } => {
                assert!(message.contains("error sending request"), "{message}");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_with_invalid_json_is_error() {
        let backend = TestBackend::start(200, "not json").await;
        let outcomes = run(task(backend.url(), "a", "b"), RelayOptions::default()).await;
        match terminal(&outcomes) {
            Outcome::Error { message } => {
                assert!(message.starts_with("Invalid JSON in OCR response"), "{message}");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_info_precedes_terminal_and_can_be_disabled() {
        let backend = TestBackend::start(422, r#"{"detail":"bad image"}"#).await;
        let outcomes = run(task(backend.url(), "a", "b"), RelayOptions::default()).await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_terminal());
        assert!(outcomes[1].is_error());

        let outcomes = run(
            task(backend.url(), "a", "b"),
            RelayOptions { emit_info: false },
        )
        .await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_error());
    }

    #[test]
    fn test_backend_error_message() {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        assert_eq!(backend_error_message(status, br#"{"detail":"x"}"#), "x");
        assert_eq!(
            backend_error_message(status, br#"{"detail":null}"#),
            "422 Unprocessable Entity"
        );
        assert_eq!(
            backend_error_message(status, br#"{"detail":[{"msg":"field required"}]}"#),
            r#"[{"msg":"field required"}]"#
        );
        assert_eq!(
            backend_error_message(status, br#"{"detail":""}"#),
            "422 Unprocessable Entity"
        );
        assert_eq!(
            backend_error_message(status, br#"{"detail":"  "}"#),
            "422 Unprocessable Entity"
        );
        assert_eq!(backend_error_message(status, b"[1,2]"), "422 Unprocessable Entity");
        assert_eq!(backend_error_message(status, b""), "422 Unprocessable Entity");
        assert_eq!(
            backend_error_message(StatusCode::from_u16(599).unwrap(), b""),
            "599"
        );
    }

    #[test]
    fn test_wire_formats() {
        let task: TaskDescriptor = serde_json::from_value(json!({
            "ocrBackendUrl": "http://localhost:8000/ocr",
            "photo1Base64": "AAAA",
            "photo2Base64": "",
        }))
        .unwrap();
        assert_eq!(task.ocr_backend_url, "http://localhost:8000/ocr");
        assert_eq!(task.photo2_base64, "");

        assert_eq!(
            serde_json::to_value(Outcome::Info {
                message: "hi".to_owned()
            })
            .unwrap(),
            json!({"status": "info", "message": "hi"})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Success { data: json!([1]) }).unwrap(),
            json!({"status": "success", "data": [1]})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Error {
                message: "no".to_owned()
            })
            .unwrap(),
            json!({"status": "error", "message": "no"})
        );
    }
}
