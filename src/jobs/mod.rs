//! Deferred follow-up work.
//!
//! Redirect reconciliation, ID disposal and concept refreshes can be handed
//! to a bounded in-process queue instead of running inside the update that
//! caused them. Enqueueing never blocks: when the queue is full the caller
//! gets the job back and runs it inline.

use std::fmt;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityId, EntityKey};

/// What a job does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Re-point references to `source_id` at `target_id`.
    UpdateRedirect {
        source_id: EntityId,
        target_id: EntityId,
    },
    /// Dispose an outdated ID once nothing references it.
    DisposeEntity { id: EntityId },
    /// Recompute a concept's cached members.
    RefreshConcept { concept: EntityKey },
}

impl JobKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpdateRedirect { .. } => "update_redirect",
            Self::DisposeEntity { .. } => "dispose_entity",
            Self::RefreshConcept { .. } => "refresh_concept",
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind.name(), self.id)
    }
}

/// How a piece of follow-up work was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued under this job ID.
    Queued(Uuid),
    /// Executed before returning.
    Inline,
}

/// Queue seam. Implementations must not block on `push`.
pub trait JobQueue: Send + Sync {
    /// Enqueues `job`, handing it back when the queue is full.
    fn push(&self, job: Job) -> Result<(), Job>;

    fn pop(&self) -> Option<Job>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded queue on a crossbeam channel.
#[derive(Debug)]
pub struct ChannelJobQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    capacity: usize,
}

impl ChannelJobQueue {
    /// Creates a queue; a zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl JobQueue for ChannelJobQueue {
    fn push(&self, job: Job) -> Result<(), Job> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => Err(job),
        }
    }

    fn pop(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    fn len(&self) -> usize {
        self.rx.len()
    }
}

/// Enqueues `kind`; on a full queue logs and returns the kind so the caller
/// can run it inline.
///
/// # Errors
/// Returns the job kind when the queue rejected it.
pub fn try_enqueue(queue: &dyn JobQueue, kind: JobKind) -> Result<Uuid, JobKind> {
    let job = Job::new(kind);
    let id = job.id;
    match queue.push(job) {
        Ok(()) => {
            tracing::debug!(target: "semstore::jobs", job = %id, "job queued");
            Ok(id)
        }
        Err(job) => {
            tracing::warn!(
                target: "semstore::jobs",
                job = %job,
                queued = queue.len(),
                "job queue full, running inline"
            );
            Err(job.kind)
        }
    }
}
