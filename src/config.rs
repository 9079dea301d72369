use crate::acquisition::DiscontinuityPolicy;
use crate::clock_sync::SyncSettings;
use crate::error::ConfigError;
use crate::scheduler::DEFAULT_START_LEAD;
use crate::sink::ArchiveLayout;
use crate::time::SampleRate;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The archive layout holds at most two concurrently recorded channels.
pub const MAX_RECORDED_CHANNELS: usize = 2;

const MAX_COMPRESSION_LEVEL: i32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Uhd,
    Simulated,
}

/// Reference clock the radio locks its oscillators to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ClockReference {
    Internal,
    External,
    Mimo,
    Gpsdo,
}

impl ClockReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockReference::Internal => "internal",
            ClockReference::External => "external",
            ClockReference::Mimo => "mimo",
            ClockReference::Gpsdo => "gpsdo",
        }
    }
}

impl FromStr for ClockReference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "internal" => Ok(ClockReference::Internal),
            "external" => Ok(ClockReference::External),
            "mimo" => Ok(ClockReference::Mimo),
            "gpsdo" => Ok(ClockReference::Gpsdo),
            other => Err(ConfigError::UnknownOption {
                kind: "clock reference",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ClockReference {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ClockReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the device's absolute time is established. Blank selects `Default`,
/// which loads the host wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TimeReference {
    #[default]
    Default,
    Gpsdo,
    External,
}

impl TimeReference {
    /// Name of the device time source, `None` when the device keeps its own.
    pub fn source(&self) -> Option<&'static str> {
        match self {
            TimeReference::Default => None,
            TimeReference::Gpsdo => Some("gpsdo"),
            TimeReference::External => Some("external"),
        }
    }
}

impl FromStr for TimeReference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "default" => Ok(TimeReference::Default),
            "gpsdo" => Ok(TimeReference::Gpsdo),
            "external" => Ok(TimeReference::External),
            other => Err(ConfigError::UnknownOption {
                kind: "time reference",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for TimeReference {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TimeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source().unwrap_or("default"))
    }
}

/// Ordered set of radio channels to record. Repeated ids keep their first
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet(Vec<usize>);

impl ChannelSet {
    /// Parses lists such as `0`, `1`, `0,1` or `"0,1"`.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        let mut ids = Vec::new();
        for token in list.split(|c| c == ',' || c == '"' || c == '\'') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id: usize = token
                .parse()
                .map_err(|_| ConfigError::ChannelList(list.to_string()))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() || ids.len() > MAX_RECORDED_CHANNELS {
            return Err(ConfigError::ChannelCount {
                requested: ids.len(),
                max: MAX_RECORDED_CHANNELS,
            });
        }
        Ok(ChannelSet(ids))
    }

    /// Checks every id against the channel count the radio reports.
    pub fn validate(&self, available: usize) -> Result<(), ConfigError> {
        match self.0.iter().find(|&&id| id >= available) {
            Some(&channel) => Err(ConfigError::InvalidChannel { channel, available }),
            None => Ok(()),
        }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    pub driver: Driver,
    pub device_args: String,
    /// Rate numerator in Hz
    pub sample_rate: f64,
    #[serde(default = "default_rate_denominator")]
    pub sample_rate_denominator: u64,
    pub center_freq: f64,
    pub clock_reference: ClockReference,
    #[serde(default)]
    pub time_reference: TimeReference,
    pub subdevice_spec: String,
    pub channel_list: String,
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_secs: f64,
}

fn default_rate_denominator() -> u64 {
    1
}

fn default_recv_timeout() -> f64 {
    3.0
}

impl RadioConfig {
    pub fn sample_rate(&self) -> Result<SampleRate, ConfigError> {
        let numerator = SampleRate::from_hz(self.sample_rate)?;
        SampleRate::new(numerator.numerator(), self.sample_rate_denominator)
    }

    /// Rate the device is asked to stream at: numerator over denominator.
    pub fn device_rate_hz(&self) -> Result<f64, ConfigError> {
        Ok(self.sample_rate()?.as_hz())
    }

    pub fn channels(&self) -> Result<ChannelSet, ConfigError> {
        ChannelSet::parse(&self.channel_list)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub output_directory: PathBuf,
    /// Shared by every channel of one run; generated when absent
    pub uuid: Option<String>,
    #[serde(flatten)]
    pub layout: ArchiveLayout,
}

impl ArchiveConfig {
    pub fn uuid_or_generate(&self) -> String {
        match &self.uuid {
            Some(uuid) => uuid.clone(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_start_lead")]
    pub start_lead_secs: f64,
    #[serde(default = "default_gps_poll_interval")]
    pub gps_poll_interval_secs: u64,
    #[serde(default = "default_pps_settle")]
    pub pps_settle_secs: u64,
    /// Absent waits for GPS lock indefinitely
    pub gps_lock_timeout_secs: Option<u64>,
    #[serde(default)]
    pub idle_backoff_micros: u64,
    #[serde(default)]
    pub discontinuity: DiscontinuityPolicy,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_start_lead() -> f64 {
    DEFAULT_START_LEAD.as_secs_f64()
}

fn default_gps_poll_interval() -> u64 {
    10
}

fn default_pps_settle() -> u64 {
    2
}

fn default_stats_interval() -> u64 {
    10
}

impl AcquisitionConfig {
    pub fn start_lead(&self) -> Result<Duration, ConfigError> {
        match Duration::try_from_secs_f64(self.start_lead_secs) {
            Ok(lead) if !lead.is_zero() => Ok(lead),
            _ => Err(ConfigError::Invalid(format!(
                "start lead must be a positive number of seconds, got {}",
                self.start_lead_secs
            ))),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_secs(self.gps_poll_interval_secs),
            settle: Duration::from_secs(self.pps_settle_secs),
            lock_timeout: self.gps_lock_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn idle_backoff(&self) -> Option<Duration> {
        if self.idle_backoff_micros == 0 {
            None
        } else {
            Some(Duration::from_micros(self.idle_backoff_micros))
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub radio: RadioConfig,
    pub archive: ArchiveConfig,
    pub acquisition: AcquisitionConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default)?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Checks everything that can be decided without talking to the radio.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.radio.sample_rate()?;
        self.radio.channels()?;
        self.acquisition.start_lead()?;

        if !self.radio.center_freq.is_finite() || self.radio.center_freq < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "center frequency {} Hz",
                self.radio.center_freq
            )));
        }
        if Duration::try_from_secs_f64(self.radio.recv_timeout_secs).is_err() {
            return Err(ConfigError::Invalid(format!(
                "receive timeout {} s",
                self.radio.recv_timeout_secs
            )));
        }
        if self.acquisition.gps_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("GPS poll interval must be positive".into()));
        }

        let layout = &self.archive.layout;
        if layout.millis_per_file == 0 || layout.subdir_cadence_secs == 0 {
            return Err(ConfigError::Invalid(
                "archive file and subdirectory lengths must be positive".into(),
            ));
        }
        if (layout.subdir_cadence_secs * 1000) % layout.millis_per_file != 0 {
            return Err(ConfigError::Invalid(format!(
                "subdirectory cadence {} s is not a whole number of {} ms files",
                layout.subdir_cadence_secs, layout.millis_per_file
            )));
        }
        if !(0..=MAX_COMPRESSION_LEVEL).contains(&layout.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "compression level {} outside 0..={}",
                layout.compression_level, MAX_COMPRESSION_LEVEL
            )));
        }
        if matches!(&self.archive.uuid, Some(uuid) if uuid.trim().is_empty()) {
            return Err(ConfigError::Invalid("archive uuid is empty".into()));
        }
        Ok(())
    }
}
