use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::F4stError;

/// AIA channels fetched when the caller does not name any.
pub const DEFAULT_WAVELENGTHS: [u32; 9] = [94, 131, 171, 193, 211, 304, 335, 1600, 1700];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A UTC timestamp with second precision, written as `2024-04-17T21:57:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObsTime(NaiveDateTime);

impl ObsTime {
    pub fn as_datetime(&self) -> &NaiveDateTime {
        &self.0
    }
}

impl fmt::Display for ObsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for ObsTime {
    type Err = F4stError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches('Z');
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .map(Self)
            .ok_or_else(|| F4stError::InvalidTimestamp(value.to_string()))
    }
}

impl Serialize for ObsTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObsTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// AIA wavelength in angstrom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wavelength(u32);

impl Wavelength {
    pub fn new(angstrom: u32) -> Result<Self, F4stError> {
        if angstrom == 0 {
            return Err(F4stError::InvalidWavelength(angstrom.to_string()));
        }
        Ok(Self(angstrom))
    }

    pub fn angstrom(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Wavelength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Wavelength {
    type Err = F4stError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_end_matches("angstrom").trim_end_matches('A');
        let angstrom = normalized
            .parse::<u32>()
            .map_err(|_| F4stError::InvalidWavelength(value.to_string()))?;
        Self::new(angstrom).map_err(|_| F4stError::InvalidWavelength(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Aia,
    Hmi,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Aia => write!(f, "AIA"),
            Instrument::Hmi => write!(f, "HMI"),
        }
    }
}

/// One unit of search+fetch work: an AIA wavelength or the HMI
/// line-of-sight magnetic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "wavelength", rename_all = "snake_case")]
pub enum Channel {
    Aia(Wavelength),
    HmiLosMagneticField,
}

impl Channel {
    pub fn instrument(&self) -> Instrument {
        match self {
            Channel::Aia(_) => Instrument::Aia,
            Channel::HmiLosMagneticField => Instrument::Hmi,
        }
    }

    /// Output subdirectory under the download root.
    pub fn dir_name(&self) -> String {
        match self {
            Channel::Aia(wave) => format!("{wave}angstrom"),
            Channel::HmiLosMagneticField => "hmi".to_string(),
        }
    }

    /// JSOC data series holding this channel.
    pub fn series(&self) -> &'static str {
        match self {
            Channel::Aia(wave) => match wave.angstrom() {
                4500.. => "aia.lev1_vis_1h",
                1000..4500 => "aia.lev1_uv_24s",
                _ => "aia.lev1_euv_12s",
            },
            Channel::HmiLosMagneticField => "hmi.M_45s",
        }
    }

    pub fn segment(&self) -> &'static str {
        match self {
            Channel::Aia(_) => "image",
            Channel::HmiLosMagneticField => "magnetogram",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Aia(wave) => write!(f, "{wave}"),
            Channel::HmiLosMagneticField => write!(f, "LOS_magnetic_field"),
        }
    }
}

/// Builds the ordered channel list for one download: the wavelengths in
/// input order, followed by the HMI channel when requested.
pub fn channels(wavelengths: &[Wavelength], include_hmi: bool) -> Vec<Channel> {
    let mut channels = wavelengths
        .iter()
        .copied()
        .map(Channel::Aia)
        .collect::<Vec<_>>();
    if include_hmi {
        channels.push(Channel::HmiLosMagneticField);
    }
    channels
}

pub fn default_wavelengths() -> Vec<Wavelength> {
    DEFAULT_WAVELENGTHS.iter().copied().map(Wavelength).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub start: ObsTime,
    pub end: ObsTime,
    pub channel: Channel,
}

impl Query {
    pub fn new(start: ObsTime, end: ObsTime, channel: Channel) -> Self {
        Self {
            start,
            end,
            channel,
        }
    }

    pub fn instrument(&self) -> Instrument {
        self.channel.instrument()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}..{}",
            self.instrument(),
            self.channel,
            self.start,
            self.end
        )
    }
}
