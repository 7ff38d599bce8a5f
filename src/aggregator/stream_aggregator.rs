//! Two-stage workflow stream aggregation
//!
//! A cycle first discovers the cluster list, then fetches the streams of each cluster
//! in cluster order and concatenates them. Consumers observe the cycle through a
//! [`StreamsSnapshot`] published on a `watch` channel; each transition swaps in a new
//! snapshot, so a reader never sees a partially merged collection.

use crate::api::StreamSource;
use crate::error::AggregationError;
use crate::streams::{ClusterId, ReplicationStream};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Progress of one aggregation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Not started in the current cycle
    Idle,
    Pending,
    Success,
    Error,
}

/// What consumers see of the current aggregation cycle
#[derive(Debug, Clone)]
pub struct StreamsSnapshot {
    pub clusters_state: StageState,
    pub streams_state: StageState,
    pub clusters: Arc<Vec<ClusterId>>,
    /// Merged streams in cluster order, as last successfully collected
    pub streams: Arc<Vec<ReplicationStream>>,
    /// Failure of the latest finished cycle; kept while a retry is in flight
    pub error: Option<Arc<AggregationError>>,
}

impl Default for StreamsSnapshot {
    fn default() -> Self {
        Self {
            clusters_state: StageState::Idle,
            streams_state: StageState::Idle,
            clusters: Arc::new(Vec::new()),
            streams: Arc::new(Vec::new()),
            error: None,
        }
    }
}

impl StreamsSnapshot {
    /// True while either stage is in flight
    pub fn is_loading(&self) -> bool {
        self.clusters_state == StageState::Pending || self.streams_state == StageState::Pending
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// A previous cycle failed and a new one is in flight
    pub fn is_retrying(&self) -> bool {
        self.is_error() && self.is_loading()
    }

    pub fn streams(&self) -> &[ReplicationStream] {
        &self.streams
    }
}

/// Fetch the streams of every cluster, one cluster at a time, and concatenate them
///
/// The result keeps cluster order, and backend order within a cluster. Any failing
/// cluster fails the whole collection; no partial list is returned.
///
/// # Errors
///
/// * `AggregationError::ClusterStreams` for the first cluster whose fetch fails
/// * `AggregationError::DuplicateStream` if two records share a `(cluster, id)` key
pub async fn collect_streams<S>(
    source: &S,
    clusters: &[ClusterId],
) -> Result<Vec<ReplicationStream>, AggregationError>
where
    S: StreamSource + ?Sized,
{
    let mut merged = Vec::new();
    let mut keys = HashSet::new();

    for cluster in clusters {
        let streams = source
            .fetch_streams(cluster)
            .await
            .map_err(|source| AggregationError::ClusterStreams {
                cluster: cluster.clone(),
                source,
            })?;

        for stream in streams {
            let key = stream.row_key();
            if !keys.insert(key.clone()) {
                return Err(AggregationError::DuplicateStream { key });
            }
            merged.push(stream);
        }
    }

    Ok(merged)
}

struct Shared<S: ?Sized> {
    source: Arc<S>,
    state: watch::Sender<StreamsSnapshot>,
    generation: AtomicU64,
}

impl<S: StreamSource + ?Sized> Shared<S> {
    /// Swap in a new snapshot derived from the current one, unless the cycle is stale
    ///
    /// The generation check runs under the channel's write lock, so nothing lands after
    /// a concurrent [`bump_generation`](Self::bump_generation) returns.
    fn publish<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut StreamsSnapshot),
    {
        let published = self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            let mut next = current.clone();
            update(&mut next);
            *current = next;
            true
        });
        if !published {
            debug!("Discarding result of stale aggregation cycle {}", generation);
        }
        published
    }

    /// Invalidate every cycle started so far and return the next generation
    fn bump_generation(&self) -> u64 {
        let mut next = 0;
        self.state.send_if_modified(|_| {
            next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        next
    }

    async fn run_cycle(&self, generation: u64) {
        debug!("Starting aggregation cycle {}", generation);

        if !self.publish(generation, |s| {
            s.clusters_state = StageState::Pending;
            s.streams_state = StageState::Idle;
        }) {
            return;
        }

        let clusters = match self.source.fetch_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!("Cluster discovery failed: {}", e);
                let error = Arc::new(AggregationError::Clusters(e));
                self.publish(generation, |s| {
                    s.clusters_state = StageState::Error;
                    s.error = Some(error);
                });
                return;
            }
        };

        let clusters = Arc::new(clusters);
        if !self.publish(generation, |s| {
            s.clusters_state = StageState::Success;
            s.clusters = clusters.clone();
            s.streams_state = StageState::Pending;
        }) {
            return;
        }

        match collect_streams(self.source.as_ref(), &clusters).await {
            Ok(streams) => {
                debug!(
                    "Aggregation cycle {} collected {} streams from {} clusters",
                    generation,
                    streams.len(),
                    clusters.len()
                );
                let streams = Arc::new(streams);
                self.publish(generation, |s| {
                    s.streams_state = StageState::Success;
                    s.streams = streams;
                    s.error = None;
                });
            }
            Err(e) => {
                warn!("Stream collection failed: {}", e);
                let error = Arc::new(e);
                self.publish(generation, |s| {
                    s.streams_state = StageState::Error;
                    s.error = Some(error);
                });
            }
        }
    }
}

/// Drives aggregation cycles and publishes their snapshots
///
/// Dropping the aggregator, or calling [`cancel`](Self::cancel), abandons any cycle in
/// flight: its results are never published.
pub struct StreamAggregator<S: StreamSource + ?Sized + 'static> {
    shared: Arc<Shared<S>>,
    task: Option<JoinHandle<()>>,
}

impl<S: StreamSource + ?Sized + 'static> StreamAggregator<S> {
    pub fn new(source: Arc<S>) -> Self {
        let (state, _) = watch::channel(StreamsSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                source,
                state,
                generation: AtomicU64::new(0),
            }),
            task: None,
        }
    }

    /// Receive every snapshot transition
    pub fn subscribe(&self) -> watch::Receiver<StreamsSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> StreamsSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Run one cycle to completion on the current task
    pub async fn run_cycle(&mut self) -> StreamsSnapshot {
        self.abort_task();
        let generation = self.shared.bump_generation();
        self.shared.run_cycle(generation).await;
        self.snapshot()
    }

    /// Start a new cycle in the background, superseding any cycle in flight
    ///
    /// Must be called from within a Tokio runtime.
    pub fn refresh(&mut self) {
        self.abort_task();
        let generation = self.shared.bump_generation();
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(async move {
            shared.run_cycle(generation).await;
        }));
    }

    /// Abandon the cycle in flight; its results are discarded
    pub fn cancel(&mut self) {
        self.abort_task();
        self.shared.bump_generation();
    }

    /// Whether a background cycle is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<S: StreamSource + ?Sized + 'static> Drop for StreamAggregator<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}
