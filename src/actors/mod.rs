//! Long-running actors
//!
//! Each actor runs as an independent tokio task that owns its state and is
//! driven by a timer plus an mpsc command channel. Callers talk to it through
//! a cloneable handle; request/response commands carry a oneshot sender.
//!
//! ```text
//!   Scheduler ──spawns──► ProbeTaskActor (one per monitor) ──► ResultSink
//!                                                               │
//!                        hub: HubPipeline ◄─────────────────────┤
//!                        agent: AgentSink ──► UploaderActor ──► hub API
//!
//!   hub: RollupActor ──► hour/day/week/month rollups + retention
//! ```
//!
//! - **ProbeTaskActor**: fires one monitor's probe every period
//! - **UploaderActor**: batches agent results and posts them to the hub
//! - **RollupActor**: keeps availability rollups current and purges old results

pub mod messages;
pub mod probe_task;
pub mod rollup;
pub mod uploader;
