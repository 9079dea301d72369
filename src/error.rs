use crate::time::AbsoluteTime;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results of the recording pipeline.
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// Problems detected before any streaming starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid channel {channel}: radio reports {available} channel(s)")]
    InvalidChannel { channel: usize, available: usize },

    #[error("{requested} channel(s) requested, between 1 and {max} can be recorded")]
    ChannelCount { requested: usize, max: usize },

    #[error("could not parse channel list '{0}'")]
    ChannelList(String),

    #[error("invalid sample rate: {0}")]
    SampleRate(String),

    #[error("unknown {kind} '{value}'")]
    UnknownOption { kind: &'static str, value: String },

    #[error("feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("{call} failed: error {code}")]
    #[cfg_attr(not(feature = "uhd"), allow(dead_code))]
    Driver { call: &'static str, code: i32 },

    #[error("sensor '{name}': {reason}")]
    Sensor { name: String, reason: String },

    #[error("receive stream has not been opened")]
    StreamNotOpen,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("write at index {got} is behind the next writable index {expected}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("sink is closed")]
    Closed,

    #[error("corrupt block in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("could not create directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("archive for channel {channel} at {path} could not be created: {source}")]
    SinkCreate {
        channel: usize,
        path: PathBuf,
        source: SinkError,
    },

    #[error("archive write failed on channel {channel} at index {index}: {source}")]
    SinkWrite {
        channel: usize,
        index: u64,
        source: SinkError,
    },

    #[error("data discontinuity: stream overflowed with next index {next_index}")]
    DataDiscontinuity { next_index: u64 },

    #[error("no GPS lock after waiting {0:?}")]
    GpsLockTimeout(Duration),

    #[error("stream start {start} has already passed (device time {now})")]
    StartMissed {
        start: AbsoluteTime,
        now: AbsoluteTime,
    },

    #[error("start instant {0} has no representable sample index")]
    StartIndex(AbsoluteTime),

    #[error("channel {0} is not tracked")]
    UnknownChannel(usize),

    #[error("channel {channel} already started at index {current}, refusing to reset to {requested}")]
    IndexReset {
        channel: usize,
        current: u64,
        requested: u64,
    },

    #[error("cancelled before streaming started")]
    Cancelled,
}
