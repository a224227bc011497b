//! Shared state handed to every API handler

use std::sync::Arc;

use crate::ingest::IngestionPoint;
use crate::scheduler::Scheduler;
use crate::sentinel::ServiceSentinel;
use crate::storage::MonitorRepository;

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub sentinel: Arc<ServiceSentinel>,
    pub ingestion: IngestionPoint,
    pub repository: Arc<dyn MonitorRepository>,
}

impl ApiState {
    pub fn new(
        scheduler: Arc<Scheduler>,
        sentinel: Arc<ServiceSentinel>,
        repository: Arc<dyn MonitorRepository>,
    ) -> Self {
        Self {
            ingestion: IngestionPoint::new(Arc::clone(&sentinel)),
            scheduler,
            sentinel,
            repository,
        }
    }
}
