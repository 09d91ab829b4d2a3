//! Cesium D2 reference transitions.
//!
//! Saturated-absorption features of the Cs D2 line from the F=4 ground state,
//! including the crossover (c/o) resonances a reference laser is usually
//! locked to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// A Cs D2 F=4 → F' feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIter, Serialize, Deserialize)]
pub enum CsD2Line {
    F3,
    /// Default lock point of the reference laser.
    #[default]
    F3F4Crossover,
    F4,
    F3F5Crossover,
    F4F5Crossover,
    F5,
}

impl CsD2Line {
    /// Line center in GHz.
    pub const fn frequency_ghz(self) -> f64 {
        match self {
            CsD2Line::F3 => 351_721.5083,
            CsD2Line::F3F4Crossover => 351_721.6089,
            CsD2Line::F4 => 351_721.7095,
            CsD2Line::F3F5Crossover => 351_721.7344,
            CsD2Line::F4F5Crossover => 351_721.8350,
            CsD2Line::F5 => 351_721.9605,
        }
    }

    /// Line center in Hz.
    pub fn frequency_hz(self) -> f64 {
        self.frequency_ghz() * 1e9
    }

    /// Short name accepted by [`FromStr`], e.g. `"3/4"` or `"5"`.
    pub const fn short_name(self) -> &'static str {
        match self {
            CsD2Line::F3 => "3",
            CsD2Line::F3F4Crossover => "3/4",
            CsD2Line::F4 => "4",
            CsD2Line::F3F5Crossover => "3/5",
            CsD2Line::F4F5Crossover => "4/5",
            CsD2Line::F5 => "5",
        }
    }
}

impl fmt::Display for CsD2Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsD2Line::F3F4Crossover | CsD2Line::F3F5Crossover | CsD2Line::F4F5Crossover => {
                write!(f, "F=4 -> F'={} c/o", self.short_name())
            }
            _ => write!(f, "F=4 -> F'={}", self.short_name()),
        }
    }
}

impl FromStr for CsD2Line {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        let key = key.strip_prefix("F'=").unwrap_or(key);
        let key = key.strip_suffix("c/o").unwrap_or(key).trim().replace('-', "/");
        CsD2Line::iter()
            .find(|line| line.short_name() == key)
            .ok_or_else(|| {
                let names: Vec<&str> = CsD2Line::iter().map(|l| l.short_name()).collect();
                format!("Unknown Cs D2 line {s:?} (expected one of {names:?})")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_is_3_4_crossover() {
        assert_eq!(CsD2Line::default(), CsD2Line::F3F4Crossover);
        assert_relative_eq!(CsD2Line::default().frequency_hz(), 351_721.6089e9);
    }

    #[test]
    fn test_lines_are_ascending() {
        let freqs: Vec<f64> = CsD2Line::iter().map(CsD2Line::frequency_ghz).collect();
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_parse_short_names() {
        assert_eq!("3/4".parse::<CsD2Line>().unwrap(), CsD2Line::F3F4Crossover);
        assert_eq!("4-5".parse::<CsD2Line>().unwrap(), CsD2Line::F4F5Crossover);
        assert_eq!("F'=5".parse::<CsD2Line>().unwrap(), CsD2Line::F5);
        assert!("6".parse::<CsD2Line>().is_err());
    }
}
