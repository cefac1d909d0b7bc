//! ReplayDispatcher - chronological re-publication with a virtual clock
//!
//! Replaying pushes every recorded sample of a source dispatcher through
//! `publish` in time order, so subscribers see recorded data exactly as
//! they would have seen it live. Timeouts run on virtual time: they fire
//! when the clock is moved past them, never on wall-clock time.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use contracts::{BusConfig, ClockMode, DataCode, Sample, SourceId, TimeStamp};
use observability::metrics::{
    record_timeout_dropped, record_timeouts_fired, BusMetricsAggregator, MetricsSummary,
};

use crate::channel::ChannelHandle;
use crate::compose::copy_priorities;
use crate::dispatch_data::{ChannelVisitor, Channelled, DispatchData};
use crate::dispatcher::Dispatcher;
use crate::error::DispatcherError;

/// Scheduled callback; it may publish and schedule further timeouts.
pub type TimeoutFn = Box<dyn FnOnce(&mut ReplayDispatcher) + Send>;

type PublishFn = Box<dyn FnOnce(&mut ReplayDispatcher) -> Result<(), DispatcherError>>;

/// One recorded sample waiting to be replayed
struct ReplayEvent {
    time: TimeStamp,
    code: DataCode,
    source: SourceId,
    publish: PublishFn,
}

/// Turns every sample of a dispatcher into a [`ReplayEvent`].
struct EventCollector {
    events: Vec<ReplayEvent>,
}

impl ChannelVisitor for EventCollector {
    fn visit<T: Channelled>(
        &mut self,
        code: DataCode,
        source: &SourceId,
        _data: &DispatchData,
        channel: &ChannelHandle<T>,
    ) {
        let channel = channel.read();
        for sample in channel.series().iter() {
            let (sample, event_source) = (sample.clone(), source.clone());
            self.events.push(ReplayEvent {
                time: sample.time,
                code,
                source: source.clone(),
                publish: Box::new(move |replay: &mut ReplayDispatcher| {
                    replay.publish_replayed(code, event_source, sample)
                }),
            });
        }
    }
}

/// A [`Dispatcher`] fed by replaying recorded data, with a virtual-time
/// timeout scheduler.
///
/// Timeouts are ordered by (fire time, scheduling order), so callbacks due at
/// the same time run in the order they were scheduled.
pub struct ReplayDispatcher {
    dispatcher: Dispatcher,
    current_time: Option<TimeStamp>,
    counter: u64,
    timeouts: BTreeMap<(TimeStamp, u64), TimeoutFn>,
    clock_mode: ClockMode,
    stats: BusMetricsAggregator,
}

impl Default for ReplayDispatcher {
    fn default() -> Self {
        Self::with_config(&BusConfig::default())
    }
}

impl ReplayDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &BusConfig) -> Self {
        Self {
            dispatcher: Dispatcher::with_config(config),
            current_time: None,
            counter: 0,
            timeouts: BTreeMap::new(),
            clock_mode: config.replay.clock_mode,
            stats: BusMetricsAggregator::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn into_dispatcher(self) -> Dispatcher {
        self.dispatcher
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.clock_mode
    }

    pub fn set_clock_mode(&mut self, mode: ClockMode) {
        self.clock_mode = mode;
    }

    // ===== Replay =====

    /// Publish every sample of `src` in time order, then fire every
    /// remaining timeout. Returns the number of samples replayed.
    pub fn replay(&mut self, src: &Dispatcher) -> Result<usize, DispatcherError> {
        self.replay_with_visitor(src, |_, _, _| Ok(()))
    }

    /// Like [`ReplayDispatcher::replay`], calling `visitor` after each
    /// published sample.
    ///
    /// The first publish or visitor error stops the replay. Pending timeouts
    /// still fire before it is returned.
    #[instrument(
        name = "replay",
        skip(self, src, visitor),
        fields(channels = src.entries().count(), clock_mode = ?self.clock_mode)
    )]
    pub fn replay_with_visitor<F>(&mut self, src: &Dispatcher, mut visitor: F) -> Result<usize, DispatcherError>
    where
        F: FnMut(&mut ReplayDispatcher, DataCode, &SourceId) -> Result<(), DispatcherError>,
    {
        copy_priorities(src, &mut self.dispatcher);

        let mut collector = EventCollector { events: Vec::new() };
        src.visit_channels(&mut collector);
        let mut events = collector.events;
        // Stable: equal times keep (code, source, index) order.
        events.sort_by_key(|event| event.time);
        let replayed = events.len();
        debug!(samples = replayed, "Collected samples to replay");

        let result = self.run_events(events, &mut visitor);
        self.finish_timeouts();
        if let Err(e) = result {
            warn!(error = %e, current_time = ?self.current_time, "Replay aborted");
            return Err(e);
        }

        info!(
            samples = replayed,
            current_time = ?self.current_time,
            "Replay finished\n{}",
            self.stats.summary()
        );
        Ok(replayed)
    }

    fn run_events<F>(&mut self, events: Vec<ReplayEvent>, visitor: &mut F) -> Result<(), DispatcherError>
    where
        F: FnMut(&mut ReplayDispatcher, DataCode, &SourceId) -> Result<(), DispatcherError>,
    {
        for event in events {
            if self.clock_mode == ClockMode::FollowSamples {
                self.current_time = Some(event.time);
                self.visit_timeouts();
            }
            (event.publish)(self)?;
            visitor(self, event.code, &event.source)?;
        }
        Ok(())
    }

    fn publish_replayed<T: Channelled>(
        &mut self,
        code: DataCode,
        source: SourceId,
        sample: Sample<T>,
    ) -> Result<(), DispatcherError> {
        self.dispatcher.publish_sample(code, source, sample)?;
        self.stats.on_published(code.short_name());
        Ok(())
    }

    // ===== Clock =====

    pub fn current_time(&self) -> Option<TimeStamp> {
        self.current_time
    }

    /// Move the clock. Timeouts are not fired; see
    /// [`ReplayDispatcher::visit_timeouts`].
    pub fn set_current_time(&mut self, time: TimeStamp) {
        self.current_time = Some(time);
    }

    /// Move a set clock forward by `delta`. No-op while the clock is unset.
    pub fn advance_time(&mut self, delta: Duration) -> Option<TimeStamp> {
        let next = self.current_time? + delta;
        self.current_time = Some(next);
        Some(next)
    }

    /// Set the clock to the sample's time, fire due timeouts, then publish.
    pub fn publish_timed_value<T: Channelled>(
        &mut self,
        code: DataCode,
        source: impl Into<SourceId>,
        sample: Sample<T>,
    ) -> Result<(), DispatcherError> {
        self.set_current_time(sample.time);
        self.visit_timeouts();
        self.publish_replayed(code, source.into(), sample)
    }

    // ===== Timeouts =====

    /// Schedule `callback` `delay_ms` after the current time.
    ///
    /// Returns false, dropping the callback, while the clock is unset.
    pub fn set_timeout<F>(&mut self, callback: F, delay_ms: u64) -> bool
    where
        F: FnOnce(&mut ReplayDispatcher) + Send + 'static,
    {
        let Some(now) = self.current_time else {
            warn!(delay_ms, "Dropping timeout scheduled before the replay clock was set");
            record_timeout_dropped();
            self.stats.on_timeout_dropped();
            return false;
        };
        let fire_at = now + Duration::from_millis(delay_ms);
        self.timeouts.insert((fire_at, self.counter), Box::new(callback));
        self.counter += 1;
        true
    }

    /// Fire, in order, every timeout due at the current time. Returns the
    /// number fired, including ones scheduled by the fired callbacks.
    pub fn visit_timeouts(&mut self) -> usize {
        let Some(now) = self.current_time else {
            return 0;
        };
        self.fire_while(|fire_at| fire_at <= now)
    }

    /// Fire every pending timeout regardless of the clock.
    pub fn finish_timeouts(&mut self) -> usize {
        self.fire_while(|_| true)
    }

    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    fn fire_while(&mut self, mut due: impl FnMut(TimeStamp) -> bool) -> usize {
        let mut fired = 0;
        while let Some(entry) = self.timeouts.first_entry() {
            if !due(entry.key().0) {
                break;
            }
            let callback = entry.remove();
            callback(self);
            fired += 1;
        }
        if fired > 0 {
            record_timeouts_fired(fired);
            self.stats.on_timeouts_fired(fired);
        }
        fired
    }

    /// Counters accumulated by this replay dispatcher
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.stats.summary()
    }
}

impl std::fmt::Debug for ReplayDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayDispatcher")
            .field("dispatcher", &self.dispatcher)
            .field("current_time", &self.current_time)
            .field("pending_timeouts", &self.timeouts.len())
            .field("clock_mode", &self.clock_mode)
            .finish()
    }
}
