// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The repair worker pool: drains the queue, enforces the per-repair deadline, and
//! applies the retry policy.

use std::{sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{queue::RepairJob, RepairQueue, SegmentRepairer};
use crate::{config::RepairConfig, utils::ExponentialBackoff};

/// How often the pool polls an empty queue.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Processes queued repair jobs with a bounded number of concurrent workers.
///
/// Each worker runs one repair under the configured deadline. Retryable failures
/// return the job to the queue after an exponential backoff; terminal failures drop
/// the job with a diagnostic.
pub struct RepairService {
    repairer: Arc<SegmentRepairer>,
    queue: Arc<RepairQueue>,
    permits: Arc<Semaphore>,
    config: RepairConfig,
}

impl std::fmt::Debug for RepairService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RepairService {
    /// Creates a new repair service draining `queue` into `repairer`.
    pub fn new(repairer: Arc<SegmentRepairer>, queue: Arc<RepairQueue>, config: RepairConfig) -> Self {
        Self {
            repairer,
            queue,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
        }
    }

    /// Runs the worker pool until cancelled. In-flight repairs observe the
    /// cancellation through their own tokens.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("repair service shutting down");
                    return;
                }
                permit = self.permits.clone().acquire_owned() => {
                    permit.expect("the semaphore is never closed")
                }
            };

            let Some(job) = self.queue.pop() else {
                drop(permit);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => continue,
                }
            };

            let service = self.clone();
            let job_cancel = cancel.child_token();
            tokio::spawn(async move {
                service.process(job, job_cancel).await;
                drop(permit);
            });
        }
    }

    /// Runs one repair attempt under the configured deadline and applies the retry
    /// policy to the result.
    #[tracing::instrument(skip(self, cancel), fields(path = %job.path, attempt = job.attempt_count))]
    async fn process(&self, job: RepairJob, cancel: CancellationToken) {
        let deadline = cancel.clone();
        let watchdog_timeout = self.config.timeout;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(watchdog_timeout).await;
            deadline.cancel();
        });

        let result = self.repairer.repair(&job.path, &cancel).await;
        watchdog.abort();

        match result {
            Ok(outcome) => {
                tracing::debug!(?outcome, "repair finished");
                self.queue.finish(&job.path);
            }
            Err(error) if error.is_retryable() => {
                let delay = ExponentialBackoff::new_with_seed(
                    self.config.min_backoff,
                    self.config.max_backoff,
                    rand::random(),
                )
                .skip(job.attempt_count)
                .next_delay();
                tracing::warn!(
                    %error,
                    phase = ?error.phase(),
                    ?delay,
                    "repair failed, re-enqueueing"
                );
                // The backoff must not occupy a worker slot; the job stays deduped
                // through the in-flight set until it re-enters the queue.
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !queue.requeue(job) {
                        tracing::debug!("repair queue full, dropping retry");
                    }
                });
            }
            Err(error) => {
                tracing::error!(%error, phase = ?error.phase(), "repair failed terminally");
                self.queue.finish(&job.path);
            }
        }
    }
}
