//! QueuedSubscription - forwards channel samples into a bounded queue
//!
//! The channel notifies synchronously; a queued subscription turns that into
//! a non-blocking hand-off so a slow consumer (logger, network forwarder) never
//! stalls the publisher. When the queue is full the sample is dropped and
//! counted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use contracts::Sample;
use observability::metrics::record_queue_drop;

use crate::channel::{ChannelHandle, SubscriberId};
use crate::metrics::SubscriberMetrics;

/// Receiving end of a queued subscriber
pub struct QueuedSubscription<T> {
    channel: ChannelHandle<T>,
    id: SubscriberId,
    rx: mpsc::Receiver<Sample<T>>,
    metrics: Arc<SubscriberMetrics>,
    attached: bool,
}

impl<T: Clone + Send + Sync + 'static> QueuedSubscription<T> {
    /// Subscribe to `channel` with a queue of `capacity` samples.
    pub fn attach(channel: &ChannelHandle<T>, min_interval: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let metrics = Arc::new(SubscriberMetrics::new());

        let (code, source) = {
            let channel = channel.read();
            (channel.code(), channel.source().clone())
        };
        let worker_metrics = Arc::clone(&metrics);

        let id = channel.subscribe(min_interval, move |sample: &Sample<T>| {
            match tx.try_send(sample.clone()) {
                Ok(()) => worker_metrics.inc_delivered_count(),
                Err(mpsc::error::TrySendError::Full(s)) => {
                    let dropped = worker_metrics.inc_dropped_count();
                    record_queue_drop(code.short_name(), dropped);
                    warn!(
                        code = %code,
                        source = %source,
                        time = %s.time,
                        dropped,
                        "Queue full, sample dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    worker_metrics.inc_closed_count();
                    debug!(code = %code, source = %source, "Queued subscriber closed");
                }
            }
        });

        debug!(code = %code, capacity, "Queued subscriber attached");

        Self {
            channel: channel.clone(),
            id,
            rx,
            metrics,
            attached: true,
        }
    }
}

impl<T> QueuedSubscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn metrics(&self) -> &Arc<SubscriberMetrics> {
        &self.metrics
    }

    /// Wait for the next sample. `None` once detached and drained.
    pub async fn recv(&mut self) -> Option<Sample<T>> {
        self.rx.recv().await
    }

    /// Next queued sample, if any.
    pub fn try_recv(&mut self) -> Option<Sample<T>> {
        self.rx.try_recv().ok()
    }

    /// Samples waiting in the queue
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Stop receiving new samples. Already queued samples stay readable.
    pub fn detach(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.attached = false;
        self.channel.unsubscribe(self.id)
    }
}

impl<T> Drop for QueuedSubscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}
