//! The ordered request pipeline shared by all callers of a connection.
//!
//! Jobs complete in strict FIFO order: the protocol carries no request
//! tags, so ordering is the only mechanism that matches replies to
//! commands. Enqueueing appends under a short-lived lock and pokes the
//! connection task; it never performs I/O on the caller's context.

use crate::error::{Result, TorCtrlError};
use crate::protocol::Reply;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// Identifier of an enqueued job, unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job. Exactly one terminal transition is permitted;
/// later attempts are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the queue; not yet written to the transport.
    Enqueued,
    /// Written to the transport; awaiting its reply block.
    Executing,
    /// Completed with a successful reply.
    Completed,
    /// Removed from the queue before being written.
    Cancelled,
    /// Completed with a rejection or a connection failure.
    Error,
}

/// How a job resolved.
pub(crate) enum JobOutcome {
    /// The matching reply block arrived.
    Reply(Reply),
    /// The connection failed before the reply arrived.
    Failed(TorCtrlError),
    /// The job was cancelled while still queued, or the connection was
    /// shut down cleanly.
    Cancelled,
}

type CompleteFn = Box<dyn FnOnce(JobOutcome) + Send>;

/// A command wrapped for the pipeline: pre-encoded wire bytes plus a
/// one-shot completion.
pub(crate) struct EnqueuedJob {
    id: JobId,
    keyword: String,
    wire: String,
    state: JobState,
    complete: Option<CompleteFn>,
}

impl EnqueuedJob {
    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn wire(&self) -> &str {
        &self.wire
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn mark_executing(&mut self) {
        if self.state == JobState::Enqueued {
            self.state = JobState::Executing;
        }
    }

    /// Resolve the job. The first call wins; any later call is a no-op.
    pub(crate) fn complete(&mut self, outcome: JobOutcome) {
        let Some(complete) = self.complete.take() else {
            return;
        };
        self.state = match &outcome {
            JobOutcome::Reply(reply) if reply.is_success() => JobState::Completed,
            JobOutcome::Reply(_) | JobOutcome::Failed(_) => JobState::Error,
            JobOutcome::Cancelled => JobState::Cancelled,
        };
        debug!(job = %self.id, keyword = %self.keyword, state = ?self.state, "job resolved");
        complete(outcome);
    }
}

struct Inner {
    queue: VecDeque<EnqueuedJob>,
    accepting: bool,
}

/// The shared job queue. At most one popped job is in flight at any
/// instant; the connection task is the only consumer.
pub(crate) struct JobQueue {
    inner: Mutex<Inner>,
    notify: tokio::sync::Notify,
    next_id: AtomicU64,
}

impl JobQueue {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(JobQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                accepting: true,
            }),
            notify: tokio::sync::Notify::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Append a job and wake the connection task. Fails synchronously,
    /// without touching the transport, once the queue has been closed.
    pub(crate) fn push(
        &self,
        keyword: String,
        wire: String,
        complete: CompleteFn,
    ) -> Result<JobId> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut inner = self.inner.lock().expect("job queue lock poisoned");
            if !inner.accepting {
                return Err(TorCtrlError::Destroyed);
            }
            inner.queue.push_back(EnqueuedJob {
                id,
                keyword,
                wire,
                state: JobState::Enqueued,
                complete: Some(complete),
            });
        }
        self.notify.notify_one();
        Ok(id)
    }

    /// Pop the head job for writing. Connection task only.
    pub(crate) fn pop(&self) -> Option<EnqueuedJob> {
        self.inner
            .lock()
            .expect("job queue lock poisoned")
            .queue
            .pop_front()
    }

    /// Wait until [`push`](Self::push) has signalled new work.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Cancel a job that is still queued. Returns `false` when the job
    /// is already in flight or resolved; cancellation is then advisory
    /// only and the job resolves via its reply or a connection failure.
    pub(crate) fn cancel(&self, id: JobId) -> bool {
        let job = {
            let mut inner = self.inner.lock().expect("job queue lock poisoned");
            let pos = inner.queue.iter().position(|j| j.id() == id);
            pos.and_then(|p| inner.queue.remove(p))
        };
        match job {
            Some(mut job) => {
                job.complete(JobOutcome::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Stop accepting work and resolve every queued job, in FIFO order,
    /// with an outcome built per job.
    pub(crate) fn close(&self, outcome: &dyn Fn() -> JobOutcome) {
        let drained: Vec<EnqueuedJob> = {
            let mut inner = self.inner.lock().expect("job queue lock poisoned");
            inner.accepting = false;
            inner.queue.drain(..).collect()
        };
        for mut job in drained {
            job.complete(outcome());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_accepting(&self) -> bool {
        self.inner.lock().expect("job queue lock poisoned").accepting
    }
}

/// Caller-side handle to an enqueued job. Await it to receive the
/// typed result of the command.
pub struct JobHandle<T> {
    id: JobId,
    queue: Weak<JobQueue>,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(id: JobId, queue: Weak<JobQueue>, rx: oneshot::Receiver<Result<T>>) -> Self {
        JobHandle { id, queue, rx }
    }

    /// The job's identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Cancel the job if it has not been written to the transport yet.
    ///
    /// Returns `true` if the job was removed from the queue; awaiting
    /// the handle then yields [`TorCtrlError::Cancelled`]. Returns
    /// `false` if the job is already in flight or resolved - the bytes
    /// cannot be unsent, so the job still resolves normally. Calling
    /// this twice is a no-op the second time.
    pub fn cancel(&self) -> bool {
        self.queue
            .upgrade()
            .map(|q| q.cancel(self.id))
            .unwrap_or(false)
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(TorCtrlError::ConnectionClosed)))
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}
