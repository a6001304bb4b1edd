//! Worker loop: drain the queue, one transfer at a time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::DispatcherInner;
use crate::error::FetchError;
use crate::job::{Job, JobResult};

pub(super) fn run(inner: Arc<DispatcherInner>, slot: usize) {
    tracing::debug!("worker {} started", slot);
    let mut handled = 0usize;
    loop {
        while !inner.is_draining() {
            match inner.queue.try_dequeue() {
                Some(job) => {
                    process(&inner, &job);
                    handled += 1;
                }
                None => break,
            }
        }
        if inner.release_worker(slot) {
            break;
        }
    }
    tracing::debug!("worker {} exiting after {} jobs", slot, handled);
}

/// Run one dequeued job to completion. A cancel flag observed here skips
/// the transfer; once the transfer starts it runs to the end.
pub(super) fn process(inner: &DispatcherInner, job: &Job) {
    let started = Instant::now();
    job.begin_processing();
    if job.is_canceled() {
        tracing::debug!("skipping canceled job {}", job.url());
        job.complete(JobResult::canceled(started.elapsed()));
        return;
    }

    let request = job.request();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        inner
            .fetcher
            .fetch(request.url(), request.form(), inner.config.request_timeout)
    }))
    .unwrap_or(Err(FetchError::Panicked));
    let elapsed = started.elapsed();

    let result = match outcome {
        Ok(data) => {
            tracing::debug!("fetched {} ({} bytes in {:?})", request.url(), data.len(), elapsed);
            JobResult::succeeded(data, elapsed)
        }
        Err(e) => {
            tracing::warn!("fetch {} failed after {:?}: {}", request.url(), elapsed, e);
            JobResult::failed(e, elapsed)
        }
    };
    job.complete(result);
}
