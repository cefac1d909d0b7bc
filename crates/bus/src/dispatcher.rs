//! Dispatcher - the hub holding every channel by (data code, source)

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use tracing::debug;

use contracts::{BusConfig, DataCode, Sample, SampleSeries, SourceId, TimeStamp, DEFAULT_PRIORITY};
use observability::metrics::record_sample_published;

use crate::channel::{Channel, ChannelHandle, SubscriberId};
use crate::dispatch_data::{ChannelVisitor, Channelled, DispatchData};
use crate::error::DispatcherError;
use crate::handle::QueuedSubscription;
use crate::priorities::SourcePriorities;

/// Data code -> source -> channel
pub type DispatchDataMap = BTreeMap<DataCode, BTreeMap<SourceId, DispatchData>>;

/// Identifies a new-source listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type NewSourceFn = Box<dyn FnMut(DataCode, &SourceId) + Send + Sync>;

/// The bus.
///
/// Each entry is either owned (created here by publishing or inserting) or
/// shared (installed with [`Dispatcher::set`], typically by a composition
/// utility). Publishing into a shared entry first replaces it with an owned
/// copy, so a dispatcher never mutates a channel it did not create.
pub struct Dispatcher {
    data: DispatchDataMap,
    owned: BTreeSet<(DataCode, SourceId)>,
    priorities: SourcePriorities,
    current: BTreeMap<DataCode, SourceId>,
    freshness_max_age: Duration,
    merge_threshold: Duration,
    default_queue_capacity: usize,
    listeners: Vec<(ListenerId, NewSourceFn)>,
    next_listener: u64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_config(&BusConfig::default())
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the priorities and limits of `config`
    pub fn with_config(config: &BusConfig) -> Self {
        Self {
            data: DispatchDataMap::new(),
            owned: BTreeSet::new(),
            priorities: SourcePriorities::from(&config.priorities),
            current: BTreeMap::new(),
            freshness_max_age: config.freshness_max_age(),
            merge_threshold: config.merge_threshold(),
            default_queue_capacity: config.default_subscriber_queue,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Empty dispatcher with the same limits (not priorities) as `self`
    pub(crate) fn empty_like(&self) -> Self {
        Self {
            data: DispatchDataMap::new(),
            owned: BTreeSet::new(),
            priorities: SourcePriorities::new(),
            current: BTreeMap::new(),
            freshness_max_age: self.freshness_max_age,
            merge_threshold: self.merge_threshold,
            default_queue_capacity: self.default_queue_capacity,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn freshness_max_age(&self) -> Duration {
        self.freshness_max_age
    }

    pub fn merge_threshold(&self) -> Duration {
        self.merge_threshold
    }

    pub fn default_queue_capacity(&self) -> usize {
        self.default_queue_capacity
    }

    // ===== Entries =====

    pub fn all_sources(&self) -> &DispatchDataMap {
        &self.data
    }

    pub fn dispatch_data_for_source(&self, code: DataCode, source: &str) -> Option<&DispatchData> {
        self.data.get(&code).and_then(|sources| sources.get(source))
    }

    /// Whether at least one source provides `code`
    pub fn has(&self, code: DataCode) -> bool {
        self.data.get(&code).is_some_and(|sources| !sources.is_empty())
    }

    pub fn has_source(&self, code: DataCode, source: &str) -> bool {
        self.dispatch_data_for_source(code, source).is_some()
    }

    pub fn sources_for_channel(&self, code: DataCode) -> Vec<SourceId> {
        self.data
            .get(&code)
            .map(|sources| sources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the entry was created by this dispatcher
    pub fn is_owned(&self, code: DataCode, source: &str) -> bool {
        self.owned.contains(&(code, SourceId::new(source)))
    }

    pub fn channel<T: Channelled>(&self, code: DataCode, source: &str) -> Option<ChannelHandle<T>> {
        self.dispatch_data_for_source(code, source)
            .and_then(|data| data.channel::<T>())
            .cloned()
    }

    /// Snapshot of one channel's samples
    pub fn values<T: Channelled>(&self, code: DataCode, source: &str) -> Option<SampleSeries<T>> {
        self.channel::<T>(code, source).map(|h| h.snapshot())
    }

    /// Install `data` as a shared entry, replacing any previous one.
    pub fn set(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        data: DispatchData,
    ) -> Result<(), DispatcherError> {
        if data.kind() != code.kind() {
            return Err(DispatcherError::type_mismatch(code, data.kind()));
        }
        self.set_shared(code, source.into(), data);
        Ok(())
    }

    /// `set` for data already known to belong to `code`
    pub(crate) fn set_shared(&mut self, code: DataCode, source: SourceId, data: DispatchData) {
        self.owned.remove(&(code, source.clone()));
        self.data.entry(code).or_default().insert(source, data);
    }

    /// Install a freshly built channel as an owned entry keyed by its own
    /// code and source.
    pub fn insert_owned(&mut self, data: DispatchData) {
        let (code, source) = (data.code(), data.source().clone());
        self.owned.insert((code, source.clone()));
        self.data.entry(code).or_default().insert(source, data);
    }

    /// Install a series built elsewhere (e.g. read from a log) as an owned
    /// channel, replacing any previous entry.
    pub fn insert_channel<T: Channelled>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        series: SampleSeries<T>,
    ) -> Result<(), DispatcherError> {
        let source = source.into();
        let channel = Channel::with_series(code, source.clone(), series);
        let data = DispatchData::from_handle(code, source, ChannelHandle::new(channel))?;
        self.insert_owned(data);
        Ok(())
    }

    /// Owned handle for publishing into or subscribing to (code, source),
    /// creating the channel or copying a shared one as needed.
    fn writable_channel<T: Channelled>(
        &mut self,
        code: DataCode,
        source: &SourceId,
    ) -> Result<ChannelHandle<T>, DispatcherError> {
        if T::KIND != code.kind() {
            return Err(DispatcherError::type_mismatch(code, T::KIND));
        }

        let existing = self.dispatch_data_for_source(code, source).cloned();
        match existing {
            Some(data) if self.owned.contains(&(code, source.clone())) => {
                Ok(data.expect_channel::<T>()?.clone())
            }
            Some(shared) => {
                let series = shared.expect_channel::<T>()?.snapshot();
                let handle = ChannelHandle::new(Channel::with_series(code, source.clone(), series));
                self.insert_owned(DispatchData::from_handle(code, source.clone(), handle.clone())?);
                debug!(code = %code, source = %source, "Copied shared channel");
                Ok(handle)
            }
            None => {
                let handle = ChannelHandle::new(Channel::<T>::new(code, source.clone()));
                self.insert_owned(DispatchData::from_handle(code, source.clone(), handle.clone())?);
                debug!(code = %code, source = %source, "New channel");
                self.notify_new_source(code, source);
                Ok(handle)
            }
        }
    }

    // ===== Publishing =====

    /// Append one value to (code, source) and notify its subscribers.
    pub fn publish_value<T: Channelled>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        time: TimeStamp,
        value: T,
    ) -> Result<(), DispatcherError> {
        self.publish_sample(code, source, Sample::new(time, value))
    }

    pub fn publish_sample<T: Channelled>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        sample: Sample<T>,
    ) -> Result<(), DispatcherError> {
        let source = source.into();
        let handle = self.writable_channel::<T>(code, &source)?;
        self.update_current(code, &source, sample.time);
        handle.publish(sample);
        record_sample_published(code.short_name(), &source);
        Ok(())
    }

    /// Bulk append without notifying subscribers. No-op for no samples.
    pub fn insert_samples<T: Channelled>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        samples: impl IntoIterator<Item = Sample<T>>,
    ) -> Result<(), DispatcherError> {
        let samples: Vec<Sample<T>> = samples.into_iter().collect();
        if samples.is_empty() {
            return Ok(());
        }
        let source = source.into();
        let handle = self.writable_channel::<T>(code, &source)?;
        handle.write().append_samples(samples);
        Ok(())
    }

    // ===== Subscriptions =====

    /// Subscribe to (code, source), creating an empty channel if needed.
    ///
    /// A shared entry is copied first, as for publishing: the subscriber sees
    /// samples published through this dispatcher, not through the one the
    /// entry came from.
    pub fn subscribe<T, F>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        min_interval: Duration,
        callback: F,
    ) -> Result<SubscriberId, DispatcherError>
    where
        T: Channelled,
        F: FnMut(&Sample<T>) + Send + Sync + 'static,
    {
        Ok(self
            .writable_channel::<T>(code, &source.into())?
            .subscribe(min_interval, callback))
    }

    /// Subscribe through a bounded queue of the default capacity.
    pub fn subscribe_queued<T: Channelled>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        min_interval: Duration,
    ) -> Result<QueuedSubscription<T>, DispatcherError> {
        let handle = self.writable_channel::<T>(code, &source.into())?;
        Ok(QueuedSubscription::attach(
            &handle,
            min_interval,
            self.default_queue_capacity,
        ))
    }

    pub fn unsubscribe(&self, code: DataCode, source: &str, id: SubscriberId) -> bool {
        self.dispatch_data_for_source(code, source)
            .is_some_and(|data| data.unsubscribe(id))
    }

    // ===== New-source listeners =====

    /// Called with (code, source) whenever publishing creates a channel.
    pub fn on_new_source<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(DataCode, &SourceId) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_new_source_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    fn notify_new_source(&mut self, code: DataCode, source: &SourceId) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(code, source);
        }
    }

    // ===== Priorities =====

    /// Registered priority of `source`, or [`DEFAULT_PRIORITY`]
    pub fn source_priority(&self, source: &str) -> i32 {
        self.priorities.get(source).unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn set_source_priority(&mut self, source: impl Into<SourceId>, priority: i32) {
        self.priorities.set(source, priority);
    }

    pub fn source_priorities(&self) -> &SourcePriorities {
        &self.priorities
    }

    /// Highest registered priority, or [`DEFAULT_PRIORITY`] when none is
    pub fn max_priority(&self) -> i32 {
        self.priorities.max().unwrap_or(DEFAULT_PRIORITY)
    }

    // ===== Current source =====

    /// Preferred entry for `code`.
    ///
    /// The source that most recently won by publishing, or when nothing was
    /// published here, the highest-priority non-empty source.
    pub fn current(&self, code: DataCode) -> Option<&DispatchData> {
        if let Some(data) = self
            .current
            .get(&code)
            .and_then(|source| self.dispatch_data_for_source(code, source))
        {
            return Some(data);
        }
        let sources = self.data.get(&code)?;
        let mut best: Option<&DispatchData> = None;
        for data in sources.values().filter(|d| !d.is_empty()) {
            let better = best.is_none_or(|b| {
                self.source_priority(data.source()) > self.source_priority(b.source())
            });
            if better {
                best = Some(data);
            }
        }
        best
    }

    pub fn current_source(&self, code: DataCode) -> Option<&SourceId> {
        self.current(code).map(|data| data.source())
    }

    fn update_current(&mut self, code: DataCode, source: &SourceId, time: TimeStamp) {
        let switch = match self.current.get(&code) {
            None => true,
            Some(current) if current == source => false,
            Some(current) => match self.dispatch_data_for_source(code, current) {
                None => true,
                Some(data) => {
                    !data.is_fresh(time, self.freshness_max_age)
                        || self.source_priority(source) > self.source_priority(current)
                }
            },
        };
        if switch {
            debug!(
                code = %code,
                from = ?self.current.get(&code).map(|s| s.as_str()),
                to = %source,
                "Current source switched"
            );
            self.current.insert(code, source.clone());
        }
    }

    // ===== Visiting =====

    /// Call `visitor` once per entry, in (code, source) order.
    pub fn visit_channels<V: ChannelVisitor>(&self, visitor: &mut V) {
        for sources in self.data.values() {
            for data in sources.values() {
                data.visit(visitor);
            }
        }
    }

    /// Every entry, in (code, source) order
    pub fn entries(&self) -> impl Iterator<Item = (DataCode, &SourceId, &DispatchData)> {
        self.data.iter().flat_map(|(&code, sources)| {
            sources.iter().map(move |(source, data)| (code, source, data))
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.entries().count())
            .field("owned", &self.owned.len())
            .field("priorities", &self.priorities)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
