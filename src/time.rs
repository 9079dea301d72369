use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Seconds since the Unix epoch with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsoluteTime {
    secs: i64,
    nanos: u32,
}

impl AbsoluteTime {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self::from_total_nanos(secs as i128 * NANOS_PER_SEC + nanos as i128)
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Whole seconds and the nanosecond remainder are taken separately so no
    /// precision is lost to a float round trip.
    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => Self::from_total_nanos(-(e.duration().as_nanos() as i128)),
        }
    }

    #[cfg(test)]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_total_nanos((secs * 1e9).round() as i128)
    }

    /// Split representation used by UHD time specs.
    #[cfg(any(test, feature = "uhd"))]
    pub fn from_parts(full_secs: i64, frac_secs: f64) -> Self {
        Self::from_total_nanos(full_secs as i128 * NANOS_PER_SEC + (frac_secs * 1e9).round() as i128)
    }

    pub fn whole_secs(&self) -> i64 {
        self.secs
    }

    #[cfg(test)]
    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    pub fn frac_secs(&self) -> f64 {
        self.nanos as f64 / 1e9
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.frac_secs()
    }

    /// `floor(self * rate)`, or `None` before the epoch or past `u64::MAX`.
    pub fn sample_index(&self, rate: SampleRate) -> Option<u64> {
        let nanos = self.total_nanos();
        if nanos < 0 {
            return None;
        }
        let scaled = (nanos as u128).checked_mul(rate.numerator() as u128)?;
        let index = scaled / (rate.denominator() as u128 * NANOS_PER_SEC as u128);
        u64::try_from(index).ok()
    }

    /// Time elapsed since `earlier`, `None` if `earlier` is later.
    pub fn duration_since(&self, earlier: AbsoluteTime) -> Option<Duration> {
        let diff = self.total_nanos() - earlier.total_nanos();
        if diff < 0 {
            return None;
        }
        u64::try_from(diff).ok().map(Duration::from_nanos)
    }

    fn total_nanos(&self) -> i128 {
        self.secs as i128 * NANOS_PER_SEC + self.nanos as i128
    }

    fn from_total_nanos(total: i128) -> Self {
        AbsoluteTime {
            secs: total.div_euclid(NANOS_PER_SEC) as i64,
            nanos: total.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }
}

impl Add<Duration> for AbsoluteTime {
    type Output = AbsoluteTime;

    fn add(self, rhs: Duration) -> AbsoluteTime {
        AbsoluteTime::from_total_nanos(self.total_nanos() + rhs.as_nanos() as i128)
    }
}

impl fmt::Display for AbsoluteTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_nanos();
        let sign = if total < 0 { "-" } else { "" };
        let abs = total.unsigned_abs();
        write!(
            f,
            "{}{}.{:09}",
            sign,
            abs / NANOS_PER_SEC as u128,
            abs % NANOS_PER_SEC as u128
        )
    }
}

/// Rational sample rate in samples per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRate {
    numerator: u64,
    denominator: u64,
}

impl SampleRate {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, ConfigError> {
        if numerator == 0 || denominator == 0 {
            return Err(ConfigError::SampleRate(format!(
                "{}/{} is not a positive rate",
                numerator, denominator
            )));
        }
        Ok(SampleRate { numerator, denominator })
    }

    /// Integral rate in Hz, e.g. `25e6`.
    pub fn from_hz(hz: f64) -> Result<Self, ConfigError> {
        if !hz.is_finite() || hz <= 0.0 || hz.fract() != 0.0 || hz > u64::MAX as f64 {
            return Err(ConfigError::SampleRate(format!(
                "{} Hz is not a positive integral rate",
                hz
            )));
        }
        Self::new(hz as u64, 1)
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    pub fn as_hz(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Time spanned by `samples` at this rate, truncated to whole nanoseconds.
    pub fn duration_of(&self, samples: u64) -> Duration {
        let nanos = samples as u128 * self.denominator as u128 * NANOS_PER_SEC as u128
            / self.numerator as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} Hz", self.numerator, self.denominator)
    }
}
