// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The `numa=` boot option.

use core::str::FromStr;

/// How NUMA discovery should behave, from the command line.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NumaOption {
    /// Probe the firmware source.
    #[default]
    On,
    /// Skip discovery entirely; a single node covers all of RAM.
    Off,
    /// Skip discovery and emulate this many nodes over the RAM span.
    Fake(u8),
    /// Probe, but refuse an ACPI-backed source (device tree still allowed).
    NoAcpi,
}

/// Error for an unrecognized `numa=` value.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidNumaOption;

impl core::fmt::Display for InvalidNumaOption {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("expected off, on, fake=<N>, or noacpi")
    }
}

impl core::error::Error for InvalidNumaOption {}

impl FromStr for NumaOption {
    type Err = InvalidNumaOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "noacpi" => Ok(Self::NoAcpi),
            _ => {
                let n = s.strip_prefix("fake=").ok_or(InvalidNumaOption)?;
                let n: u8 = n.parse().map_err(|_| InvalidNumaOption)?;
                if n == 0 {
                    return Err(InvalidNumaOption);
                }
                Ok(Self::Fake(n))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("on".parse(), Ok(NumaOption::On));
        assert_eq!("off".parse(), Ok(NumaOption::Off));
        assert_eq!("noacpi".parse(), Ok(NumaOption::NoAcpi));
        assert_eq!("fake=4".parse(), Ok(NumaOption::Fake(4)));
        assert_eq!("fake=0".parse::<NumaOption>(), Err(InvalidNumaOption));
        assert_eq!("fake=".parse::<NumaOption>(), Err(InvalidNumaOption));
        assert_eq!("maybe".parse::<NumaOption>(), Err(InvalidNumaOption));
    }
}
