//! Channel - one (data code, source) time series and its subscribers

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use contracts::{DataCode, Sample, SampleSeries, SourceId, TimeStamp};
use observability::metrics::record_subscriber_notified;

/// Identifies a subscriber within one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Callback invoked with each sample a subscriber is due to see
pub type SubscriberFn<T> = Box<dyn FnMut(&Sample<T>) + Send + Sync>;

struct Subscriber<T> {
    id: SubscriberId,
    min_interval: Duration,
    last_notified: Option<TimeStamp>,
    callback: SubscriberFn<T>,
}

impl<T> Subscriber<T> {
    fn is_due(&self, time: TimeStamp) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        match self.last_notified {
            None => true,
            Some(last) => time - last >= self.min_interval.as_secs_f64(),
        }
    }

    /// Invoke the callback if the throttle allows it.
    fn notify(&mut self, sample: &Sample<T>) -> bool {
        if !self.is_due(sample.time) {
            return false;
        }
        (self.callback)(sample);
        self.last_notified = Some(sample.time);
        true
    }
}

/// Owned series of one (code, source) pair plus its rate-limited subscribers.
pub struct Channel<T> {
    code: DataCode,
    source: SourceId,
    series: SampleSeries<T>,
    subscribers: Vec<Subscriber<T>>,
    next_subscriber: u64,
    /// Subscribers detached for a running notification round
    in_flight: Vec<SubscriberId>,
    /// In-flight subscribers removed during their round
    cancelled: Vec<SubscriberId>,
}

impl<T> Channel<T> {
    pub fn new(code: DataCode, source: impl Into<SourceId>) -> Self {
        Self::with_series(code, source, SampleSeries::new())
    }

    pub fn with_series(code: DataCode, source: impl Into<SourceId>, series: SampleSeries<T>) -> Self {
        Self {
            code,
            source: source.into(),
            series,
            subscribers: Vec::new(),
            next_subscriber: 0,
            in_flight: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    #[inline]
    pub fn code(&self) -> DataCode {
        self.code
    }

    #[inline]
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    #[inline]
    pub fn series(&self) -> &SampleSeries<T> {
        &self.series
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn last_sample(&self) -> Option<&Sample<T>> {
        self.series.last()
    }

    pub fn last_time(&self) -> Option<TimeStamp> {
        self.series.last().map(|s| s.time)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len() + self.in_flight.len() - self.cancelled.len()
    }

    /// Register a callback notified at most once per `min_interval` of
    /// sample time. A zero interval means every publish.
    pub fn subscribe<F>(&mut self, min_interval: Duration, callback: F) -> SubscriberId
    where
        F: FnMut(&Sample<T>) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push(Subscriber {
            id,
            min_interval,
            last_notified: None,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a subscriber. Returns false for unknown ids.
    ///
    /// A subscriber removed from inside a notification round stops receiving
    /// samples once that round ends.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        if let Some(pos) = self.subscribers.iter().position(|s| s.id == id) {
            self.subscribers.remove(pos);
            return true;
        }
        if self.in_flight.contains(&id) && !self.cancelled.contains(&id) {
            self.cancelled.push(id);
            return true;
        }
        false
    }

    /// Append without notifying anyone.
    pub fn append_samples(&mut self, samples: impl IntoIterator<Item = Sample<T>>) {
        self.series.extend(samples);
    }

    /// Append and notify due subscribers. Returns the number notified.
    pub fn publish(&mut self, sample: Sample<T>) -> usize
    where
        T: Clone,
    {
        self.series.push(sample.clone());
        let notified = self
            .subscribers
            .iter_mut()
            .map(|s| s.notify(&sample))
            .filter(|&n| n)
            .count();
        record_notifications(self.code, notified);
        notified
    }

    /// Detach the current subscribers for a notification round.
    fn begin_round(&mut self) -> Vec<Subscriber<T>> {
        let round = std::mem::take(&mut self.subscribers);
        self.in_flight.extend(round.iter().map(|s| s.id));
        round
    }

    /// Reattach the subscribers of a finished round ahead of any that were
    /// added while it ran.
    fn end_round(&mut self, mut round: Vec<Subscriber<T>>) {
        self.in_flight.retain(|id| !round.iter().any(|s| s.id == *id));
        let cancelled = &mut self.cancelled;
        round.retain(|s| match cancelled.iter().position(|id| *id == s.id) {
            Some(pos) => {
                cancelled.swap_remove(pos);
                false
            }
            None => true,
        });
        round.append(&mut self.subscribers);
        self.subscribers = round;
    }
}

impl<T: Clone> Channel<T> {
    /// A new channel with a copy of this series and no subscribers.
    pub fn detached_copy(&self) -> Self {
        Self::with_series(self.code, self.source.clone(), self.series.clone())
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("code", &self.code)
            .field("source", &self.source)
            .field("len", &self.series.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn record_notifications(code: DataCode, notified: usize) {
    for _ in 0..notified {
        record_subscriber_notified(code.short_name());
    }
}

/// Shared handle to a [`Channel`].
///
/// Dispatchers hold channels through handles so derived dispatchers can share
/// them. Lock poisoning is recovered: a panicking subscriber leaves the
/// series usable.
pub struct ChannelHandle<T>(Arc<RwLock<Channel<T>>>);

impl<T> Clone for ChannelHandle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> ChannelHandle<T> {
    pub fn new(channel: Channel<T>) -> Self {
        Self(Arc::new(RwLock::new(channel)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Channel<T>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Channel<T>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same channel
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    pub fn subscribe<F>(&self, min_interval: Duration, callback: F) -> SubscriberId
    where
        F: FnMut(&Sample<T>) + Send + Sync + 'static,
    {
        self.write().subscribe(min_interval, callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.write().unsubscribe(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<T: Clone> ChannelHandle<T> {
    /// Append a sample and notify due subscribers.
    ///
    /// The lock is released while callbacks run, so a callback may publish
    /// into this same channel. Subscribers busy in the outer round are not
    /// notified of such nested samples.
    pub fn publish(&self, sample: Sample<T>) -> usize {
        let (code, round) = {
            let mut channel = self.write();
            channel.series.push(sample.clone());
            (channel.code, channel.begin_round())
        };

        let mut round = Round { handle: self, subscribers: round };
        let notified = round
            .subscribers
            .iter_mut()
            .map(|s| s.notify(&sample))
            .filter(|&n| n)
            .count();

        drop(round);
        record_notifications(code, notified);
        notified
    }

    /// Copy of the series at this instant
    pub fn snapshot(&self) -> SampleSeries<T> {
        self.read().series().clone()
    }
}

/// Subscribers detached for one notification round of a handle. Dropping it
/// reattaches them, also when a callback unwinds.
struct Round<'a, T> {
    handle: &'a ChannelHandle<T>,
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Drop for Round<'_, T> {
    fn drop(&mut self) {
        let subscribers = std::mem::take(&mut self.subscribers);
        self.handle.write().end_round(subscribers);
    }
}

impl<T> fmt::Debug for ChannelHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelHandle").field(&*self.read()).finish()
    }
}
