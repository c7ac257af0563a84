//! Command-line entry points.

use clap::Args;
use futures::StreamExt as _;

use crate::{async_utils::BoxedStream, config::resolve_backend_url, prelude::*};

pub mod batch;
pub mod check;
pub mod schema;
pub mod submit;

/// Where to find the OCR backend.
#[derive(Debug, Clone, Args)]
pub struct BackendOpts {
    /// The OCR endpoint, e.g. `http://localhost:8000/ocr`. Defaults to
    /// `$OCR_BACKEND_URL`.
    #[clap(long)]
    pub url: Option<String>,
}

impl BackendOpts {
    /// The endpoint from `--url` or the environment.
    pub fn backend_url(&self) -> Result<String> {
        resolve_backend_url(self.url.as_deref(), None)
    }
}

/// Common options for subcommands that process streams of tasks.
#[derive(Debug, Clone, Args)]
pub struct StreamOpts {
    /// Limit processing to the first N tasks.
    #[clap(long)]
    pub take_first: Option<usize>,

    /// Max number of tasks to relay at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// What portion of tasks should we allow to fail? Specified as a number
    /// between 0.0 and 1.0.
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,
}

impl StreamOpts {
    /// Apply any necessary stream opts to our input stream.
    pub fn apply_stream_input_opts<T>(
        &self,
        input: BoxedStream<Result<T>>,
    ) -> BoxedStream<Result<T>>
    where
        T: 'static,
    {
        if let Some(take_first) = self.take_first {
            input.take(take_first).boxed()
        } else {
            input
        }
    }

    /// How many tasks we expect, given how many are in the input.
    pub fn expected_len(&self, input_len: Option<usize>) -> Option<usize> {
        match (input_len, self.take_first) {
            (Some(len), Some(take_first)) => Some(len.min(take_first)),
            (len, _) => len,
        }
    }
}
