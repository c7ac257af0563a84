//! I/O utilities.
//!
//! This module is responsible for reading JSON task files, reading JSONL
//! batch inputs, and writing JSONL outcomes. Inputs may come from a file or
//! from standard input, and outputs may go to a file or to standard output.

use std::{pin::Pin, sync::Arc};

use futures::{StreamExt as _, TryStreamExt as _, pin_mut};
use serde::de::DeserializeOwned;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt as _, AsyncReadExt as _, AsyncWrite,
        AsyncWriteExt as _, BufReader, BufWriter,
    },
};
use tokio_stream::wrappers::LinesStream;

use crate::prelude::*;

use super::BoxedStream;

/// A buffered reader for either a file or standard input, plus a
/// human-readable description of where the data came from.
struct InputReader {
    /// A description of the input source, for error messages.
    description: String,

    /// Our reader.
    reader: Pin<Box<dyn AsyncBufRead + Send + Sync + 'static>>,
}

impl InputReader {
    /// Open a [`Path`], or standard input if `path` is `None` or `-`.
    async fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path != Path::new("-") => {
                let file = File::open(path).await.with_context(|| {
                    format!("Failed to open file at path: {:?}", path)
                })?;
                Ok(Self {
                    description: path.to_string_lossy().into_owned(),
                    reader: Box::pin(BufReader::new(file)),
                })
            }
            _ => Ok(Self {
                description: "stdin".to_owned(),
                reader: Box::pin(BufReader::new(tokio::io::stdin())),
            }),
        }
    }
}

/// Read a single JSON value from a file or standard input.
pub async fn read_json<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned,
{
    let InputReader {
        description,
        mut reader,
    } = InputReader::open(path).await?;
    let mut data = String::new();
    // Read all at once because `serde_json` doesn't do async I/O.
    reader
        .read_to_string(&mut data)
        .await
        .with_context(|| format!("Failed to read {}", description))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse JSON from {}", description))
}

/// Count the non-blank lines in a JSONL file, for use as a progress bar
/// length. Returns `None` for standard input and for things that aren't
/// regular files, like named pipes.
#[instrument(level = "debug", skip_all)]
pub async fn count_jsonl_records(path: Option<&Path>) -> Result<Option<usize>> {
    let Some(path) = path.filter(|p| *p != Path::new("-") && p.is_file()) else {
        return Ok(None);
    };
    let InputReader { reader, .. } = InputReader::open(Some(path)).await?;
    let count = LinesStream::new(reader.lines())
        .try_fold(0, |acc, line| async move {
            Ok(if line.trim().is_empty() { acc } else { acc + 1 })
        })
        .await
        .with_context(|| format!("Failed to count records in {:?}", path))?;
    Ok(Some(count))
}

/// Read JSONL records from a file or standard input. Blank lines are
/// skipped.
pub async fn read_jsonl<T>(path: Option<&Path>) -> Result<BoxedStream<Result<T>>>
where
    T: DeserializeOwned + Send + 'static,
{
    let InputReader {
        description,
        reader,
    } = InputReader::open(path).await?;
    let description = Arc::new(description);
    let lines = LinesStream::new(reader.lines())
        .try_filter(|line| futures::future::ready(!line.trim().is_empty()));
    Ok(lines
        .map(move |line| {
            let line = line
                .with_context(|| format!("Failed to read line from {}", description))?;
            serde_json::from_str::<T>(&line).with_context(|| {
                format!("Failed to parse JSON from line in {}: {:?}", description, line)
            })
        })
        .boxed())
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of serializable records as JSONL to either standard output
/// or a file.
pub async fn write_output<T>(path: Option<&Path>, stream: BoxedStream<Result<T>>) -> Result<()>
where
    T: Serialize,
{
    write_jsonl(create_writer(path).await?, stream).await
}

/// Write a stream of serializable records as JSONL to an already-open writer.
pub async fn write_jsonl<T>(
    writer: Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>,
    stream: BoxedStream<Result<T>>,
) -> Result<()>
where
    T: Serialize,
{
    let mut writer = BufWriter::new(writer);
    pin_mut!(stream);
    while let Some(record) = stream.next().await {
        let record = record?;
        let json =
            serde_json::to_string(&record).context("Failed to serialize output record")?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
        // Outcomes are few and callers may be watching them live.
        writer.flush().await.context("Failed to flush output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
