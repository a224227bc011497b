//! Message types for actor communication
//!
//! Every actor owns an mpsc command receiver. Requests that need an answer
//! carry a oneshot `respond_to` sender.

use tokio::sync::oneshot;

use crate::ingest::AgentProbeItem;
use crate::storage::StorageResult;

/// Commands understood by a [`ProbeTaskActor`](super::probe_task::ProbeTaskActor)
#[derive(Debug)]
pub enum TaskCommand {
    /// Stop ticking. A probe that is already running completes and is delivered.
    Shutdown,
}

/// Commands understood by the [`UploaderActor`](super::uploader::UploaderActor)
#[derive(Debug)]
pub enum UploaderCommand {
    /// Queue one probe outcome for the next batch
    Enqueue(AgentProbeItem),

    /// Upload everything queued right now
    ///
    /// Responds with the number of items the hub accepted.
    Flush {
        respond_to: oneshot::Sender<Result<usize, String>>,
    },

    /// Flush once more and exit
    Shutdown,
}

/// Per-run counters of the rollup actor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupReport {
    /// Availability rows written
    pub rollups: usize,

    /// Probe results deleted by retention
    pub purged: usize,
}

/// Commands understood by the [`RollupActor`](super::rollup::RollupActor)
#[derive(Debug)]
pub enum RollupCommand {
    /// Run one rollup and retention pass immediately
    RunNow {
        respond_to: oneshot::Sender<StorageResult<RollupReport>>,
    },

    Shutdown,
}
