//! The `submit` subcommand.

use std::sync::{Arc, Mutex};

use clap::Args;
use futures::StreamExt as _;

use crate::{
    async_utils::io::{create_writer, write_jsonl},
    card::BusinessCard,
    config::resolve_backend_url,
    prelude::*,
    relay::{
        Outcome, RelayHandle, RelayOptions, TaskDescriptor, create_http_client,
        spawn_relay,
    },
    task::ImageEncoding,
    ui::{ProgressConfig, Ui},
};

/// Submit command line arguments.
#[derive(Debug, Args)]
pub struct SubmitOpts {
    /// The OCR endpoint, e.g. `http://localhost:8000/ocr`. Overrides any URL
    /// in the task file. Defaults to `$OCR_BACKEND_URL`.
    #[clap(long)]
    pub url: Option<String>,

    /// A JSON task with `photo1Base64`, `photo2Base64` and optionally
    /// `ocrBackendUrl`. Use `-` for standard input.
    #[clap(long, conflicts_with_all = ["front", "back"], required_unless_present = "front")]
    pub task: Option<PathBuf>,

    /// An image of the front of the card.
    #[clap(long)]
    pub front: Option<PathBuf>,

    /// An image of the back of the card.
    #[clap(long, requires = "front")]
    pub back: Option<PathBuf>,

    /// How to encode image files.
    #[clap(long, value_enum, default_value_t = ImageEncoding::default())]
    pub encoding: ImageEncoding,

    /// Don't write the "submitting" info outcome.
    #[clap(long)]
    pub no_info: bool,

    /// Write outcomes to this file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

impl SubmitOpts {
    /// Build our task from a task file or from images.
    async fn task(&self) -> Result<TaskDescriptor> {
        match (&self.task, &self.front) {
            (Some(task_path), _) => {
                TaskDescriptor::from_json_file(task_path, self.url.as_deref()).await
            }
            (None, Some(front)) => {
                let url = resolve_backend_url(self.url.as_deref(), None)?;
                TaskDescriptor::from_images(url, front, self.back.as_deref(), self.encoding)
                    .await
            }
            (None, None) => Err(anyhow!("Either --task or --front is required")),
        }
    }
}

/// The `submit` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_submit(ui: Ui, opts: &SubmitOpts) -> Result<()> {
    let task = opts.task().await?;
    let client = create_http_client()?;
    // Open the output first, so we never send a request we can't report.
    let writer = create_writer(opts.output_path.as_deref()).await?;

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📇",
        msg: "Waiting for OCR backend",
        done_msg: "OCR backend answered",
    });
    let RelayHandle { outcomes, worker } = spawn_relay(
        client,
        task,
        RelayOptions {
            emit_info: !opts.no_info,
        },
    );

    // Write outcomes as they arrive, but remember how things ended.
    let terminal = Arc::new(Mutex::new(None));
    let seen = terminal.clone();
    let output = outcomes
        .map(move |outcome: Outcome| {
            if outcome.is_terminal() {
                *seen.lock().expect("lock poisoned") = Some(outcome.clone());
            }
            Ok::<_, anyhow::Error>(outcome)
        })
        .boxed();
    let written = write_jsonl(writer, output).await;
    let joined = worker.join().await;
    spinner.finish();
    written?;
    joined?;

    let terminal = terminal.lock().expect("lock poisoned").take();
    match terminal {
        Some(Outcome::Success { data }) => {
            if let Some(card) = BusinessCard::from_data(&data) {
                ui.display_message("✅", &card.summary());
            }
            Ok(())
        }
        Some(Outcome::Error { message }) => Err(anyhow!("OCR request failed: {message}")),
        _ => Err(anyhow!("OCR relay finished without a result")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::relay::test_backend::TestBackend;

    fn opts(url: String, front: PathBuf, output_path: PathBuf) -> SubmitOpts {
        SubmitOpts {
            url: Some(url),
            task: None,
            front: Some(front),
            back: None,
            encoding: ImageEncoding::Raw,
            no_info: false,
            output_path: Some(output_path),
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_submit_writes_outcomes() {
        let backend = TestBackend::start(200, r#"{"name":"Ada","company":"Engines Ltd"}"#).await;
        let dir = tempfile::tempdir().unwrap();
        let front = dir.path().join("front.jpg");
        std::fs::write(&front, b"hello").unwrap();
        let out = dir.path().join("out.jsonl");

        cmd_submit(Ui::init_for_tests(), &opts(backend.url(), front, out.clone()))
            .await
            .unwrap();

        assert_eq!(
            backend.last_body(),
            Some(json!({"base64Image1": "aGVsbG8=", "base64Image2": ""}))
        );
        let lines = read_lines(&out);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "info");
        assert_eq!(
            lines[1],
            json!({"status": "success", "data": {"name": "Ada", "company": "Engines Ltd"}})
        );
    }

    #[tokio::test]
    async fn test_bad_output_path_sends_nothing() {
        let backend = TestBackend::start(200, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let front = dir.path().join("front.jpg");
        std::fs::write(&front, b"hello").unwrap();
        let out = dir.path().join("missing").join("out.jsonl");

        let err = cmd_submit(Ui::init_for_tests(), &opts(backend.url(), front, out))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create file"), "{err}");
        assert_eq!(backend.last_body(), None);
    }

    #[tokio::test]
    async fn test_submit_fails_after_writing_error() {
        let backend = TestBackend::start(422, r#"{"detail":"bad image"}"#).await;
        let dir = tempfile::tempdir().unwrap();
        let front = dir.path().join("front.jpg");
        std::fs::write(&front, b"hello").unwrap();
        let out = dir.path().join("out.jsonl");

        let mut opts = opts(backend.url(), front, out.clone());
        opts.no_info = true;
        let err = cmd_submit(Ui::init_for_tests(), &opts).await.unwrap_err();
        assert!(err.to_string().contains("bad image"));

        assert_eq!(
            read_lines(&out),
            vec![json!({"status": "error", "message": "Request failed: bad image"})]
        );
    }
}
