//! DataCode - the table of quantities the bus knows about.
//!
//! Rules for editing the table:
//! - never remove an entry
//! - never change an existing short name
//! - never change an existing code
//!
//! Recorded data refers to channels by code and short name.

use std::fmt;

use crate::ContractError;

/// Concrete value type behind a data code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Angle,
    Velocity,
    Length,
    GeoPosition,
    TimeStamp,
    AbsoluteOrientation,
    BinaryEdge,
    AngularVelocity,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Angle => "angle",
            ValueKind::Velocity => "velocity",
            ValueKind::Length => "length",
            ValueKind::GeoPosition => "geo_position",
            ValueKind::TimeStamp => "timestamp",
            ValueKind::AbsoluteOrientation => "absolute_orientation",
            ValueKind::BinaryEdge => "binary_edge",
            ValueKind::AngularVelocity => "angular_velocity",
        }
    }
}

/// Generates [`DataCode`] and its lookup tables from one list, so the code,
/// short name, value kind and description can never drift apart.
macro_rules! define_data_codes {
    ($(($handle:ident, $code:literal, $short:literal, $kind:ident, $desc:literal)),+ $(,)?) => {
        /// Identifies which physical quantity a channel carries.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum DataCode {
            $($handle = $code,)+
        }

        impl DataCode {
            /// Every code, in numeric order
            pub const ALL: &'static [DataCode] = &[$(DataCode::$handle,)+];

            /// Stable numeric code
            #[inline]
            pub fn code(self) -> u8 {
                self as u8
            }

            /// Single-word identifier, e.g. `awa`, `watSpeed`
            pub fn short_name(self) -> &'static str {
                match self {
                    $(DataCode::$handle => $short,)+
                }
            }

            /// Human readable description
            pub fn description(self) -> &'static str {
                match self {
                    $(DataCode::$handle => $desc,)+
                }
            }

            /// Value type carried by channels of this code
            pub fn kind(self) -> ValueKind {
                match self {
                    $(DataCode::$handle => ValueKind::$kind,)+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(DataCode::$handle),)+
                    _ => None,
                }
            }

            pub fn from_short_name(name: &str) -> Option<Self> {
                match name {
                    $($short => Some(DataCode::$handle),)+
                    _ => None,
                }
            }
        }
    };
}

define_data_codes!(
    (Awa, 1, "awa", Angle, "apparent wind angle"),
    (Aws, 2, "aws", Velocity, "apparent wind speed"),
    (Twa, 3, "twa", Angle, "true wind angle"),
    (Tws, 4, "tws", Velocity, "true wind speed"),
    (Twdir, 5, "twdir", Angle, "true wind direction"),
    (GpsSpeed, 6, "gpsSpeed", Velocity, "GPS speed"),
    (GpsBearing, 7, "gpsBearing", Angle, "GPS bearing"),
    (MagHeading, 8, "magHdg", Angle, "magnetic heading"),
    (WatSpeed, 9, "watSpeed", Velocity, "water speed"),
    (WatDist, 10, "watDist", Length, "distance over water"),
    (GpsPos, 11, "pos", GeoPosition, "GPS position"),
    (DateTime, 12, "dateTime", TimeStamp, "GPS date and time (UTC)"),
    (TargetVmg, 13, "targetVmg", Velocity, "Target VMG"),
    (Vmg, 14, "vmg", Velocity, "VMG"),
    (Orient, 15, "orient", AbsoluteOrientation, "Absolute anemobox orientation"),
    (RudderAngle, 16, "rudderAngle", Angle, "Rudder angle"),
    (ValidGps, 17, "validGps", BinaryEdge, "Valid GPS periods"),
    (RateOfTurn, 18, "rot", AngularVelocity, "Rate of turn"),
    (TotWatDist, 19, "totDist", Length, "total distance over water"),
    (EngineRpm, 20, "rpm", AngularVelocity, "Engine RPM"),
    (Yaw, 21, "yaw", Angle, "Yaw (heading)"),
    (Pitch, 22, "pitch", Angle, "Pitch"),
    (Roll, 23, "roll", Angle, "Roll"),
);

impl fmt::Display for DataCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl TryFrom<u8> for DataCode {
    type Error = ContractError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        DataCode::from_code(code).ok_or(ContractError::UnknownDataCode { code })
    }
}

impl std::str::FromStr for DataCode {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataCode::from_short_name(s).ok_or_else(|| ContractError::UnknownShortName {
            name: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_round_trip() {
        for &code in DataCode::ALL {
            assert_eq!(DataCode::from_code(code.code()), Some(code));
            assert_eq!(code.short_name().parse::<DataCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<u8> = DataCode::ALL.iter().map(|c| c.code()).collect();
        let names: HashSet<&str> = DataCode::ALL.iter().map(|c| c.short_name()).collect();
        assert_eq!(codes.len(), DataCode::ALL.len());
        assert_eq!(names.len(), DataCode::ALL.len());
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(DataCode::Awa.code(), 1);
        assert_eq!(DataCode::GpsPos.short_name(), "pos");
        assert_eq!(DataCode::ValidGps.kind(), ValueKind::BinaryEdge);
        assert_eq!(DataCode::EngineRpm.description(), "Engine RPM");
    }

    #[test]
    fn test_unknown_code() {
        assert!(DataCode::from_code(0).is_none());
        let err = DataCode::try_from(99).unwrap_err();
        assert!(err.to_string().contains("99"));
        assert!("nope".parse::<DataCode>().is_err());
    }
}
