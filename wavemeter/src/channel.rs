//! Fiber optic switch input channels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumIter;

use crate::fos::ChannelError;

/// One of the four optical inputs of the fiber optic switch.
///
/// The switch is driven by the low two bits of a digital output port, so the
/// channel number is also the raw bit pattern written to the port. Values
/// outside `0..=3` are rejected, never clamped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
#[repr(u8)]
pub enum Channel {
    Ch0 = 0,
    Ch1 = 1,
    Ch2 = 2,
    Ch3 = 3,
}

impl Channel {
    /// Channel number (0-3).
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Bit pattern written to the switch's output port.
    pub const fn bits(self) -> u8 {
        self as u8 & 0b11
    }
}

impl TryFrom<i64> for Channel {
    type Error = ChannelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Channel::Ch0),
            1 => Ok(Channel::Ch1),
            2 => Ok(Channel::Ch2),
            3 => Ok(Channel::Ch3),
            other => Err(ChannelError::InvalidChannel(other)),
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = ChannelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Channel::try_from(i64::from(value))
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.index()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix("ch")
            .or_else(|| trimmed.strip_prefix("CH"))
            .unwrap_or(trimmed);
        let value: i64 = trimmed
            .parse()
            .map_err(|_| ChannelError::Parse(s.to_string()))?;
        Channel::try_from(value)
    }
}
