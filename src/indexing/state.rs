use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{IndexingInfo, IndexingStatus};

/// Top bit of the activity word: a full reindex holds the job slot.
/// The remaining bits count single-video changes in progress.
const REINDEXING: usize = 1 << (usize::BITS - 1);

/// Process-wide state of the full reindex job.
///
/// One atomic word is the only lock. A reindex claims it with a single
/// compare-and-swap that only succeeds while no change is registered, and a
/// change registers only while no reindex holds it, so exactly one side wins.
/// Both are released when the returned guard is dropped, so a panicking
/// holder still frees them.
#[derive(Debug, Clone)]
pub struct JobState {
    activity: Arc<AtomicUsize>,
    info: Arc<RwLock<IndexingInfo>>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of owning the reindex slot
#[derive(Debug)]
pub struct JobSlot {
    activity: Arc<AtomicUsize>,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.activity.fetch_and(!REINDEXING, Ordering::SeqCst);
        debug!("🔓 Released reindex slot");
    }
}

/// Registration of one running single-video change
#[derive(Debug)]
pub struct ChangeGuard {
    activity: Arc<AtomicUsize>,
}

impl Drop for ChangeGuard {
    fn drop(&mut self) {
        self.activity.fetch_sub(1, Ordering::SeqCst);
    }
}

impl JobState {
    pub fn new() -> Self {
        Self {
            activity: Arc::new(AtomicUsize::new(0)),
            info: Arc::new(RwLock::new(IndexingInfo::none())),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.activity.load(Ordering::SeqCst) & REINDEXING != 0
    }

    /// Number of single-video changes currently registered
    pub fn active_changes(&self) -> usize {
        self.activity.load(Ordering::SeqCst) & !REINDEXING
    }

    /// Claim the job slot, or `None` if a job already holds it or a change
    /// is still running
    pub fn try_acquire(&self) -> Option<JobSlot> {
        self.activity
            .compare_exchange(0, REINDEXING, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| JobSlot {
                activity: Arc::clone(&self.activity),
            })
    }

    /// Register a single-video change, or `None` while a job holds the slot
    pub fn try_begin_change(&self) -> Option<ChangeGuard> {
        self.activity
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current & REINDEXING == 0).then(|| current + 1)
            })
            .ok()
            .map(|_| ChangeGuard {
                activity: Arc::clone(&self.activity),
            })
    }

    pub async fn info(&self) -> IndexingInfo {
        self.info.read().await.clone()
    }

    /// Record a transition of the running job
    pub async fn set(&self, _slot: &JobSlot, info: IndexingInfo) {
        debug!("📊 Reindex status -> {:?}", info.status);
        *self.info.write().await = info;
    }

    /// Replace the state from persisted metadata, unless a job has started
    /// meanwhile or the current state is a failure newer than `info`
    pub async fn refresh(&self, info: IndexingInfo) -> IndexingInfo {
        let mut current = self.info.write().await;
        if self.is_in_flight() {
            return current.clone();
        }

        let newer_failure = current.status == IndexingStatus::Failed
            && match (current.start_time, info.finish_time) {
                (Some(failed_at), Some(finished_at)) => failed_at > finished_at,
                _ => false,
            };
        if !newer_failure {
            *current = info;
        }
        current.clone()
    }
}
