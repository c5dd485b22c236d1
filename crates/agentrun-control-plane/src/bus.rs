//! Publish/subscribe channel for live progress events.
//!
//! Each project gets its own broadcast channel, created on first subscribe
//! and dropped again once nobody listens. Publishing never blocks and never
//! queues: with no subscriber the event is simply discarded.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::RwLock;
use std::task::{ready, Context, Poll};

use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

use agentrun_core::{ProgressEvent, ProjectName};

/// Default per-project channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of progress events to the observers of each project.
pub struct ProgressBus {
    channels: RwLock<HashMap<ProjectName, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressBus {
    /// Create a bus whose per-project channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to events published for `project` from now on.
    ///
    /// Dropping the returned stream cancels the subscription.
    pub fn subscribe(&self, project: &ProjectName) -> ProgressSubscription {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels.retain(|_, tx| tx.receiver_count() > 0);

        let receiver = channels
            .entry(project.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(project = %project, "Progress subscriber added");
        ProgressSubscription {
            project: project.clone(),
            inner: BroadcastStream::new(receiver),
        }
    }

    /// Deliver `event` to the current subscribers of its project.
    ///
    /// Returns how many subscribers the event was handed to.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let project = event.project_name.clone();
        let sent = {
            let channels = self
                .channels
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match channels.get(&project) {
                Some(tx) => tx.send(event).ok(),
                None => return 0,
            }
        };

        match sent {
            Some(count) => count,
            None => {
                // Every receiver is gone; forget the channel.
                let mut channels = self
                    .channels
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if channels
                    .get(&project)
                    .is_some_and(|tx| tx.receiver_count() == 0)
                {
                    channels.remove(&project);
                }
                0
            }
        }
    }

    /// Number of live subscribers for `project`.
    pub fn subscriber_count(&self, project: &ProjectName) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(project)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of live subscribers across all projects.
    pub fn total_subscribers(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|tx| tx.receiver_count())
            .sum()
    }

    /// Number of projects with a retained channel.
    pub fn channel_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Open-ended stream of one project's progress events.
pub struct ProgressSubscription {
    project: ProjectName,
    inner: BroadcastStream<ProgressEvent>,
}

impl ProgressSubscription {
    /// Project this subscription listens to.
    pub fn project(&self) -> &ProjectName {
        &self.project
    }
}

impl Stream for ProgressSubscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(project = %self.project, skipped, "Progress subscriber lagged, skipping events");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
