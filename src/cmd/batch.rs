//! The `batch` subcommand.

use std::sync::{Arc, Mutex};

use clap::Args;
use futures::StreamExt as _;

use crate::{
    async_utils::io::{count_jsonl_records, read_jsonl, write_output},
    batch::{BatchCounters, BatchInput, flatten_outputs, relay_batch},
    prelude::*,
    relay::{RelayOptions, create_http_client},
    ui::{ProgressConfig, Ui},
};

use super::StreamOpts;

/// Batch command line arguments.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// JSONL input, one task per line, each with `ocrBackendUrl`,
    /// `photo1Base64`, `photo2Base64` and an optional `id`. Reads standard
    /// input if omitted.
    pub input_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    /// Don't write "submitting" info outcomes.
    #[clap(long)]
    pub no_info: bool,

    /// Write outcomes to this file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `batch` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    let input_path = opts.input_path.as_deref();
    let stream_opts = &opts.stream_opts;

    let input_len = count_jsonl_records(input_path).await?;
    let input = stream_opts.apply_stream_input_opts(read_jsonl::<BatchInput>(input_path).await?);

    let pb = ui.new_batch_progress(
        &ProgressConfig {
            emoji: "📇",
            msg: "Relaying OCR tasks",
            done_msg: "Relayed OCR tasks",
        },
        stream_opts.expected_len(input_len),
    );

    let per_task = relay_batch(
        create_http_client()?,
        input,
        stream_opts.job_count,
        RelayOptions {
            emit_info: !opts.no_info,
        },
    );
    let per_task = pb.clone().wrap_stream(per_task).boxed();

    let counters = Arc::new(Mutex::new(BatchCounters::default()));
    write_output(
        opts.output_path.as_deref(),
        flatten_outputs(per_task, counters.clone()),
    )
    .await?;
    pb.finish();

    let counters = counters.lock().expect("lock poisoned").clone();
    info!(
        tasks = counters.task_count,
        failures = counters.failure_count,
        "Batch finished"
    );
    if counters.failure_count > 0 {
        ui.display_message(
            "❌",
            &format!("{} OCR tasks failed", counters.failure_count),
        );
    }
    counters.check_failure_rate(stream_opts.allowed_failure_rate)
}
