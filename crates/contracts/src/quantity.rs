//! Physical quantity value types carried by channels.
//!
//! The bus treats values as opaque: it only needs them to be comparable,
//! cloneable and checkable for finiteness. Units are SI internally.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sample::{check_series, Sample, SeriesIssue};
use crate::{TimeStamp, ValueKind};

/// A value type that may be stored in a channel.
///
/// Every implementor maps to exactly one [`ValueKind`]; the bus uses the kind
/// to resolve the concrete type behind a [`DataCode`](crate::DataCode) once per
/// channel.
pub trait Quantity:
    Clone + PartialEq + PartialOrd + fmt::Debug + Serialize + Send + Sync + 'static
{
    /// Kind tag used by the type-erased channel wrapper
    const KIND: ValueKind;

    /// False for NaN/infinite components
    fn is_finite(&self) -> bool;

    /// First problem found in a series of this type, if any.
    fn series_issue(samples: &[Sample<Self>]) -> Option<SeriesIssue> {
        check_series(samples)
    }
}

macro_rules! scalar_quantity {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:expr, $ctor:ident, $getter:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(f64);

        impl $name {
            #[inline]
            pub const fn $ctor(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn $getter(self) -> f64 {
                self.0
            }
        }

        impl std::ops::Mul<f64> for $name {
            type Output = $name;

            #[inline]
            fn mul(self, rhs: f64) -> $name {
                Self(self.0 * rhs)
            }
        }

        impl Quantity for $name {
            const KIND: ValueKind = $kind;

            #[inline]
            fn is_finite(&self) -> bool {
                self.0.is_finite()
            }
        }
    };
}

scalar_quantity!(
    /// Plane angle (radians)
    Angle, ValueKind::Angle, from_radians, radians
);
scalar_quantity!(
    /// Speed (meters per second)
    Velocity, ValueKind::Velocity, from_meters_per_second, meters_per_second
);
scalar_quantity!(
    /// Distance (meters)
    Length, ValueKind::Length, from_meters, meters
);
scalar_quantity!(
    /// Rotation rate (radians per second)
    AngularVelocity, ValueKind::AngularVelocity, from_radians_per_second, radians_per_second
);

const METERS_PER_NAUTICAL_MILE: f64 = 1852.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

impl Angle {
    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_radians(degrees.to_radians())
    }

    pub fn degrees(self) -> f64 {
        self.radians().to_degrees()
    }
}

impl Velocity {
    pub fn from_knots(knots: f64) -> Self {
        Self::from_meters_per_second(knots * METERS_PER_NAUTICAL_MILE / SECONDS_PER_HOUR)
    }

    pub fn knots(self) -> f64 {
        self.meters_per_second() * SECONDS_PER_HOUR / METERS_PER_NAUTICAL_MILE
    }
}

impl Length {
    pub fn from_nautical_miles(nm: f64) -> Self {
        Self::from_meters(nm * METERS_PER_NAUTICAL_MILE)
    }

    pub fn nautical_miles(self) -> f64 {
        self.meters() / METERS_PER_NAUTICAL_MILE
    }
}

impl AngularVelocity {
    pub fn from_rpm(rpm: f64) -> Self {
        Self::from_radians_per_second(rpm * std::f64::consts::TAU / 60.0)
    }

    pub fn rpm(self) -> f64 {
        self.radians_per_second() * 60.0 / std::f64::consts::TAU
    }
}

/// WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat: Angle,
    pub lon: Angle,
    #[serde(default = "zero_length")]
    pub alt: Length,
}

fn zero_length() -> Length {
    Length::from_meters(0.0)
}

impl GeoPosition {
    pub fn new(lat: Angle, lon: Angle) -> Self {
        Self {
            lat,
            lon,
            alt: zero_length(),
        }
    }
}

impl Quantity for GeoPosition {
    const KIND: ValueKind = ValueKind::GeoPosition;

    fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.alt.is_finite()
    }
}

/// Heading, roll and pitch of the instrument box
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct AbsoluteOrientation {
    pub heading: Angle,
    pub roll: Angle,
    pub pitch: Angle,
}

impl Quantity for AbsoluteOrientation {
    const KIND: ValueKind = ValueKind::AbsoluteOrientation;

    fn is_finite(&self) -> bool {
        self.heading.is_finite() && self.roll.is_finite() && self.pitch.is_finite()
    }
}

/// Edge of a boolean signal; a well-formed edge channel alternates
/// `ToOn`, `ToOff`, `ToOn`, ... and ends with `ToOff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryEdge {
    ToOn,
    ToOff,
}

impl Quantity for BinaryEdge {
    const KIND: ValueKind = ValueKind::BinaryEdge;

    fn is_finite(&self) -> bool {
        true
    }

    fn series_issue(samples: &[Sample<Self>]) -> Option<SeriesIssue> {
        if let Some(index) = samples.iter().position(|s| !s.time.is_defined()) {
            return Some(SeriesIssue::UndefinedTime { index });
        }
        let (first, last) = (samples.first()?, samples.last()?);
        if first.value != BinaryEdge::ToOn {
            return Some(SeriesIssue::EdgeStartsOff { time: first.time });
        }
        if last.value != BinaryEdge::ToOff {
            return Some(SeriesIssue::EdgeEndsOn { time: last.time });
        }
        samples
            .chunks_exact(2)
            .enumerate()
            .find(|(_, pair)| pair[0].value == pair[1].value)
            .map(|(i, pair)| SeriesIssue::RepeatedEdge {
                index: 2 * i,
                time: pair[0].time,
            })
    }
}

/// GPS date and time channels carry timestamps as values.
impl Quantity for TimeStamp {
    const KIND: ValueKind = ValueKind::TimeStamp;

    fn is_finite(&self) -> bool {
        self.is_defined()
    }
}
