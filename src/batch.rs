//! Relaying many tasks at once.
//!
//! Each task gets its own relay. Relays share an HTTP connection pool and
//! nothing else, so one task failing never affects another. Outputs come back
//! in input order, with every outcome tagged by its task's `id`.

use std::sync::{Arc, Mutex};

use futures::{FutureExt as _, StreamExt as _, stream};
use schemars::JsonSchema;

use crate::{
    async_utils::BoxedStream,
    prelude::*,
    relay::{Outcome, RelayHandle, RelayOptions, TaskDescriptor, spawn_relay},
};

/// One line of batch input.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchInput {
    /// An ID to copy onto this task's outputs. Any JSON value.
    #[serde(default)]
    pub id: Value,

    /// The task itself.
    #[serde(flatten)]
    pub task: TaskDescriptor,
}

/// One line of batch output.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct BatchOutput {
    /// The ID of the task this outcome belongs to.
    pub id: Value,

    /// The outcome.
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Relay a stream of tasks, running up to `job_count` at a time.
///
/// The returned stream yields all the outputs for one task at a time, in
/// input order. Use [`flatten_outputs`] to turn it into a stream of lines.
pub fn relay_batch(
    client: reqwest::Client,
    input: BoxedStream<Result<BatchInput>>,
    job_count: usize,
    options: RelayOptions,
) -> BoxedStream<Result<Vec<BatchOutput>>> {
    input
        .map(move |input| {
            let client = client.clone();
            async move {
                let BatchInput { id, task } = input?;
                let RelayHandle { outcomes, worker } = spawn_relay(client, task, options);
                let outcomes = outcomes.collect::<Vec<_>>().await;
                worker.join().await?;
                let outputs: Vec<BatchOutput> = outcomes
                    .into_iter()
                    .map(|outcome| BatchOutput {
                        id: id.clone(),
                        outcome,
                    })
                    .collect();
                Ok::<_, anyhow::Error>(outputs)
            }
            .boxed()
        })
        .buffered(job_count.max(1))
        .boxed()
}

/// Flatten per-task outputs into individual lines, counting as we go.
pub fn flatten_outputs(
    per_task: BoxedStream<Result<Vec<BatchOutput>>>,
    counters: Arc<Mutex<BatchCounters>>,
) -> BoxedStream<Result<BatchOutput>> {
    per_task
        .flat_map(move |outputs| {
            let lines = match outputs {
                Ok(outputs) => {
                    counters.lock().expect("lock poisoned").update(&outputs);
                    outputs.into_iter().map(Ok).collect::<Vec<_>>()
                }
                Err(err) => vec![Err(err)],
            };
            stream::iter(lines)
        })
        .boxed()
}

/// Running totals for a batch.
#[derive(Clone, Debug, Default)]
pub struct BatchCounters {
    /// How many tasks finished?
    pub task_count: usize,

    /// How many tasks ended in an error?
    pub failure_count: usize,
}

impl BatchCounters {
    /// Count one task's outputs.
    pub fn update(&mut self, outputs: &[BatchOutput]) {
        self.task_count += 1;
        if outputs.iter().any(|output| output.outcome.is_error()) {
            self.failure_count += 1;
        }
    }

    /// Fail if more tasks failed than we allow. `allowed_failure_rate` is
    /// between 0.0 and 1.0.
    pub fn check_failure_rate(&self, allowed_failure_rate: f32) -> Result<()> {
        if self.task_count == 0 {
            return Ok(());
        }
        let failure_rate = self.failure_count as f32 / self.task_count as f32;
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of OCR tasks failed, but only {:.2}% were allowed",
                self.failure_count,
                self.task_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            Ok(())
        }
    }
}
