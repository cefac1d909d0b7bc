//! DispatchData - a channel of any value kind behind one type
//!
//! The set of value kinds is closed, so the erased channel is an enum with one
//! variant per [`ValueKind`]. Generic code gets the concrete type back in two
//! ways:
//! - [`DispatchData::channel`] when the caller already knows `T`
//! - [`DispatchData::visit`] with a [`ChannelVisitor`], which resolves `T`
//!   with a single match and calls the visitor's generic method

use std::fmt;
use std::time::Duration;

use contracts::{
    AbsoluteOrientation, Angle, AngularVelocity, BinaryEdge, DataCode, GeoPosition, Length,
    Quantity, Sample, SourceId, TimeStamp, ValueKind, Velocity,
};

use crate::channel::{Channel, ChannelHandle, SubscriberId};
use crate::error::DispatcherError;

/// Erased channel handle, one variant per value kind
#[derive(Clone)]
pub enum TypedChannel {
    Angle(ChannelHandle<Angle>),
    Velocity(ChannelHandle<Velocity>),
    Length(ChannelHandle<Length>),
    GeoPosition(ChannelHandle<GeoPosition>),
    TimeStamp(ChannelHandle<TimeStamp>),
    AbsoluteOrientation(ChannelHandle<AbsoluteOrientation>),
    BinaryEdge(ChannelHandle<BinaryEdge>),
    AngularVelocity(ChannelHandle<AngularVelocity>),
}

/// Value types that can live in a [`TypedChannel`].
pub trait Channelled: Quantity {
    fn wrap(handle: ChannelHandle<Self>) -> TypedChannel;

    fn unwrap(channel: &TypedChannel) -> Option<&ChannelHandle<Self>>;
}

macro_rules! impl_channelled {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl Channelled for $ty {
                #[inline]
                fn wrap(handle: ChannelHandle<Self>) -> TypedChannel {
                    TypedChannel::$variant(handle)
                }

                #[inline]
                fn unwrap(channel: &TypedChannel) -> Option<&ChannelHandle<Self>> {
                    match channel {
                        TypedChannel::$variant(handle) => Some(handle),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_channelled!(
    Angle => Angle,
    Velocity => Velocity,
    Length => Length,
    GeoPosition => GeoPosition,
    TimeStamp => TimeStamp,
    AbsoluteOrientation => AbsoluteOrientation,
    BinaryEdge => BinaryEdge,
    AngularVelocity => AngularVelocity,
);

/// Evaluate `$body` with `$t` bound to the value type of `$kind`.
///
/// ```ignore
/// let data = with_value_type!(code.kind(), T => DispatchData::empty_typed::<T>(code, source));
/// ```
#[macro_export]
macro_rules! with_value_type {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            ::contracts::ValueKind::Angle => {
                type $t = ::contracts::Angle;
                $body
            }
            ::contracts::ValueKind::Velocity => {
                type $t = ::contracts::Velocity;
                $body
            }
            ::contracts::ValueKind::Length => {
                type $t = ::contracts::Length;
                $body
            }
            ::contracts::ValueKind::GeoPosition => {
                type $t = ::contracts::GeoPosition;
                $body
            }
            ::contracts::ValueKind::TimeStamp => {
                type $t = ::contracts::TimeStamp;
                $body
            }
            ::contracts::ValueKind::AbsoluteOrientation => {
                type $t = ::contracts::AbsoluteOrientation;
                $body
            }
            ::contracts::ValueKind::BinaryEdge => {
                type $t = ::contracts::BinaryEdge;
                $body
            }
            ::contracts::ValueKind::AngularVelocity => {
                type $t = ::contracts::AngularVelocity;
                $body
            }
        }
    };
}

/// Evaluate `$body` with `$h` bound to the concrete handle inside a
/// [`TypedChannel`].
macro_rules! with_handle {
    ($channel:expr, $h:ident => $body:expr) => {
        match $channel {
            TypedChannel::Angle($h) => $body,
            TypedChannel::Velocity($h) => $body,
            TypedChannel::Length($h) => $body,
            TypedChannel::GeoPosition($h) => $body,
            TypedChannel::TimeStamp($h) => $body,
            TypedChannel::AbsoluteOrientation($h) => $body,
            TypedChannel::BinaryEdge($h) => $body,
            TypedChannel::AngularVelocity($h) => $body,
        }
    };
}

impl TypedChannel {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedChannel::Angle(_) => ValueKind::Angle,
            TypedChannel::Velocity(_) => ValueKind::Velocity,
            TypedChannel::Length(_) => ValueKind::Length,
            TypedChannel::GeoPosition(_) => ValueKind::GeoPosition,
            TypedChannel::TimeStamp(_) => ValueKind::TimeStamp,
            TypedChannel::AbsoluteOrientation(_) => ValueKind::AbsoluteOrientation,
            TypedChannel::BinaryEdge(_) => ValueKind::BinaryEdge,
            TypedChannel::AngularVelocity(_) => ValueKind::AngularVelocity,
        }
    }

    fn as_ptr(&self) -> *const () {
        with_handle!(self, h => h.as_ptr())
    }
}

/// Generic operation over every channel of a dispatcher.
///
/// `visit` is called once per (code, source) entry with the concrete value
/// type resolved.
pub trait ChannelVisitor {
    fn visit<T: Channelled>(
        &mut self,
        code: DataCode,
        source: &SourceId,
        data: &DispatchData,
        channel: &ChannelHandle<T>,
    );
}

/// Type-erased handle to one channel.
///
/// Cloning shares the channel. Two `DispatchData` are the same channel iff
/// [`DispatchData::ptr_eq`] holds.
#[derive(Clone)]
pub struct DispatchData {
    code: DataCode,
    source: SourceId,
    channel: TypedChannel,
}

impl DispatchData {
    /// Wrap an existing handle. Fails when `T` is not the value type of `code`.
    pub fn from_handle<T: Channelled>(
        code: DataCode,
        source: impl Into<SourceId>,
        handle: ChannelHandle<T>,
    ) -> Result<Self, DispatcherError> {
        if T::KIND != code.kind() {
            return Err(DispatcherError::type_mismatch(code, T::KIND));
        }
        Ok(Self {
            code,
            source: source.into(),
            channel: T::wrap(handle),
        })
    }

    /// Wrap a handle whose value type is known to match `code`.
    pub(crate) fn from_typed<T: Channelled>(
        code: DataCode,
        source: SourceId,
        handle: ChannelHandle<T>,
    ) -> Self {
        debug_assert_eq!(T::KIND, code.kind());
        Self {
            code,
            source,
            channel: T::wrap(handle),
        }
    }

    /// Wrap an owned channel, taking code and source from it.
    pub fn from_channel<T: Channelled>(channel: Channel<T>) -> Result<Self, DispatcherError> {
        let (code, source) = (channel.code(), channel.source().clone());
        Self::from_handle(code, source, ChannelHandle::new(channel))
    }

    /// New empty channel of the value type registered for `code`.
    pub fn empty(code: DataCode, source: impl Into<SourceId>) -> Self {
        let source = source.into();
        let channel = with_value_type!(code.kind(), T => {
            T::wrap(ChannelHandle::new(Channel::<T>::new(code, source.clone())))
        });
        Self {
            code,
            source,
            channel,
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

    pub fn short_name(&self) -> &'static str {
        self.code.short_name()
    }

    pub fn description(&self) -> &'static str {
        self.code.description()
    }

    pub fn kind(&self) -> ValueKind {
        self.channel.kind()
    }

    pub fn typed(&self) -> &TypedChannel {
        &self.channel
    }

    /// Concrete handle, if `T` is the channel's value type.
    pub fn channel<T: Channelled>(&self) -> Option<&ChannelHandle<T>> {
        T::unwrap(&self.channel)
    }

    /// Like [`DispatchData::channel`] but reporting the mismatch.
    pub fn expect_channel<T: Channelled>(&self) -> Result<&ChannelHandle<T>, DispatcherError> {
        T::unwrap(&self.channel).ok_or(DispatcherError::TypeMismatch {
            code: self.code,
            expected: self.kind(),
            got: T::KIND,
        })
    }

    pub fn visit<V: ChannelVisitor>(&self, visitor: &mut V) {
        with_handle!(&self.channel, h => visitor.visit(self.code, &self.source, self, h))
    }

    #[inline]
    pub fn ptr_eq(&self, other: &DispatchData) -> bool {
        self.channel.as_ptr() == other.channel.as_ptr()
    }

    pub fn len(&self) -> usize {
        with_handle!(&self.channel, h => h.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_time(&self) -> Option<TimeStamp> {
        with_handle!(&self.channel, h => h.read().series().first().map(|s| s.time))
    }

    pub fn last_time(&self) -> Option<TimeStamp> {
        with_handle!(&self.channel, h => h.read().last_time())
    }

    pub fn subscriber_count(&self) -> usize {
        with_handle!(&self.channel, h => h.read().subscriber_count())
    }

    /// Whether the last sample is younger than `max_age` at time `now`.
    pub fn is_fresh(&self, now: TimeStamp, max_age: Duration) -> bool {
        self.last_time()
            .is_some_and(|last| now - last < max_age.as_secs_f64())
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        with_handle!(&self.channel, h => h.unsubscribe(id))
    }

    /// New, unshared channel with a copy of the samples and no subscribers.
    pub fn deep_copy(&self) -> DispatchData {
        let channel = with_handle!(&self.channel, h => {
            Channelled::wrap(ChannelHandle::new(h.read().detached_copy()))
        });
        Self {
            code: self.code,
            source: self.source.clone(),
            channel,
        }
    }

    /// New channel holding the samples with `from <= time <= to`.
    pub fn cropped(&self, from: Option<TimeStamp>, to: Option<TimeStamp>) -> DispatchData {
        let channel = with_handle!(&self.channel, h => {
            let series = h.read().series().crop(from, to);
            Channelled::wrap(ChannelHandle::new(Channel::with_series(
                self.code,
                self.source.clone(),
                series,
            )))
        });
        Self {
            code: self.code,
            source: self.source.clone(),
            channel,
        }
    }

    /// Same channel, registered under another source name.
    pub fn renamed(&self, source: impl Into<SourceId>) -> DispatchData {
        Self {
            code: self.code,
            source: source.into(),
            channel: self.channel.clone(),
        }
    }

    /// Copy of every sample as `(time, json value)` pairs.
    pub fn to_json_samples(&self) -> Vec<(TimeStamp, serde_json::Value)> {
        with_handle!(&self.channel, h => {
            h.read()
                .series()
                .iter()
                .map(|s| (s.time, sample_json(s)))
                .collect()
        })
    }
}

fn sample_json<T: Quantity>(sample: &Sample<T>) -> serde_json::Value {
    serde_json::to_value(&sample.value).unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for DispatchData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Channel of type {} named {} with {} samples with {} listeners",
            self.short_name(),
            self.source,
            self.len(),
            self.subscriber_count()
        )
    }
}

impl fmt::Debug for DispatchData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchData")
            .field("code", &self.code)
            .field("source", &self.source)
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
