use crate::clock_sync::Clock;
use crate::config::{ChannelSet, Driver, RadioConfig};
use crate::error::{RadioError, RecorderResult};
use crate::simulated::{SimulatedRadio, SimulatedSettings};
use crate::time::AbsoluteTime;
use num_complex::Complex;
use std::sync::Arc;

/// One complex sample with 16-bit integer I and Q.
pub type Sample = Complex<i16>;

pub const GPS_LOCKED_SENSOR: &str = "gps_locked";
pub const GPS_TIME_SENSOR: &str = "gps_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorValue {
    Bool(bool),
    Int(i64),
}

impl SensorValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SensorValue::Bool(b) => Some(*b),
            SensorValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SensorValue::Int(i) => Some(*i),
            SensorValue::Bool(_) => None,
        }
    }
}

/// Result of one receive call covering every open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RecvOutcome {
    /// `count` samples were placed at the front of every channel buffer.
    /// `time` is the timestamp of the first one when the device reports it.
    Samples {
        count: usize,
        time: Option<AbsoluteTime>,
    },
    /// The device dropped samples; the next batch is not contiguous with the
    /// previous one.
    Overflow { out_of_sequence: bool },
    Timeout,
    Error(String),
}

/// The radio hardware as the recorder sees it.
pub trait RadioFrontEnd: Send {
    fn channel_count(&self) -> usize;

    /// Prepares a receive stream for `channels`, in order. Returns the number
    /// of samples each per-channel buffer must hold.
    fn open_stream(&mut self, channels: &ChannelSet) -> Result<usize, RadioError>;

    fn current_time(&self) -> Result<AbsoluteTime, RadioError>;

    /// Device time latched at the most recent pulse-per-second edge.
    fn last_pulse_time(&self) -> Result<AbsoluteTime, RadioError>;

    fn set_time(&mut self, time: AbsoluteTime) -> Result<(), RadioError>;

    /// Loads `time` into the device clock at the next PPS edge.
    fn set_time_at_next_pulse(&mut self, time: AbsoluteTime) -> Result<(), RadioError>;

    fn sensor(&self, name: &str) -> Result<SensorValue, RadioError>;

    /// Starts continuous streaming on every open channel at `at`.
    fn issue_stream_start(&mut self, at: AbsoluteTime) -> Result<(), RadioError>;

    fn issue_stream_stop(&mut self) -> Result<(), RadioError>;

    /// Blocks until up to `max_samples` samples per channel are available.
    /// `buffers` holds one buffer per open channel, in stream order.
    fn receive(&mut self, buffers: &mut [Vec<Sample>], max_samples: usize) -> RecvOutcome;
}

/// Opens the radio backend selected in the configuration.
pub fn open_radio(cfg: &RadioConfig, clock: Arc<dyn Clock>) -> RecorderResult<Box<dyn RadioFrontEnd>> {
    match cfg.driver {
        Driver::Simulated => {
            let settings = SimulatedSettings::from_config(cfg)?;
            Ok(Box::new(SimulatedRadio::new(settings, clock)))
        }
        #[cfg(feature = "uhd")]
        Driver::Uhd => {
            let _ = clock;
            Ok(Box::new(crate::uhd::UhdRadio::open(cfg)?))
        }
        #[cfg(not(feature = "uhd"))]
        Driver::Uhd => Err(crate::error::ConfigError::FeatureNotEnabled("uhd".into()).into()),
    }
}
