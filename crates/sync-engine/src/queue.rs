//! Write-queue plumbing: job messages, pending handles and receipts.

use portal::{BlobSha, CollectionKind, PortalError, WriteJobId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages consumed by the write worker, strictly in send order.
pub(crate) enum Job {
    Write {
        id: WriteJobId,
        kind: CollectionKind,
        reply: oneshot::Sender<Result<WriteReceipt, PortalError>>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Outcome of a completed write job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteReceipt {
    /// The job that produced this receipt.
    pub job: WriteJobId,
    /// The collection written.
    pub kind: CollectionKind,
    /// SHA of the remote file after the job. `None` only for a collection
    /// that has never existed remotely and had nothing to write.
    pub sha: Option<BlobSha>,
    /// PUT requests issued. Zero when an earlier job already wrote the edits.
    pub attempts: u32,
}

/// A queued write. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    job: WriteJobId,
    kind: CollectionKind,
    reply: oneshot::Receiver<Result<WriteReceipt, PortalError>>,
}

impl PendingWrite {
    pub(crate) fn new(
        job: WriteJobId,
        kind: CollectionKind,
        reply: oneshot::Receiver<Result<WriteReceipt, PortalError>>,
    ) -> Self {
        Self { job, kind, reply }
    }

    /// The job id, as logged by the worker.
    pub fn job(&self) -> WriteJobId {
        self.job
    }

    /// The collection being written.
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Waits for the worker to finish this job.
    pub async fn wait(self) -> Result<WriteReceipt, PortalError> {
        self.reply.await.map_err(|_| PortalError::QueueClosed)?
    }
}
