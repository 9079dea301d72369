use crate::config::ChannelSet;
use crate::error::{RecorderError, RecorderResult, SinkError};
use crate::index::ChannelIndexTracker;
use crate::radio::Sample;
use crate::time::SampleRate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Complex, 16-bit signed integer I and Q
    Sc16,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Sc16 => 4,
        }
    }
}

/// How a channel archive is cut into directories and files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveLayout {
    pub subdir_cadence_secs: u64,
    pub millis_per_file: u64,
    /// 0 stores raw samples, 1..=22 compresses with zstd
    #[serde(default)]
    pub compression_level: i32,
    #[serde(default)]
    pub checksum: bool,
    #[serde(default = "default_subchannels")]
    pub num_subchannels: u32,
    #[serde(default = "default_continuous")]
    pub continuous: bool,
}

fn default_subchannels() -> u32 {
    1
}

fn default_continuous() -> bool {
    true
}

/// Everything a sink needs to know when it is created.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkParams {
    pub format: SampleFormat,
    pub rate: SampleRate,
    pub start_index: u64,
    pub uuid: String,
    pub layout: ArchiveLayout,
}

/// Time-indexed storage for one channel.
pub trait ArchivalSink: Send {
    /// Stores `samples` so that `samples[0]` lands at absolute `index`.
    fn write(&mut self, index: u64, samples: &[Sample]) -> Result<(), SinkError>;

    /// Flushes everything; later writes fail.
    fn close(&mut self) -> Result<(), SinkError>;
}

pub trait SinkFactory {
    fn create(&self, path: &Path, params: &SinkParams) -> Result<Box<dyn ArchivalSink>, SinkError>;
}

/// Directory name of the channel recorded at `position`: `cha`, `chb`, ...
pub fn channel_label(position: usize) -> String {
    let letter = char::from(b'a' + (position % 26) as u8);
    format!("ch{}", letter)
}

pub struct ChannelState {
    pub channel: usize,
    pub label: String,
    pub path: PathBuf,
    sink: Box<dyn ArchivalSink>,
}

/// Owns one sink per recorded channel and the index each one writes at next.
pub struct SinkAdapter {
    channels: Vec<ChannelState>,
    tracker: ChannelIndexTracker,
    closed: bool,
}

impl SinkAdapter {
    /// Creates `<root>/cha`, `<root>/chb`, ... and a sink in each, every
    /// channel starting at `params.start_index`.
    pub fn create(
        root: &Path,
        channels: &ChannelSet,
        factory: &dyn SinkFactory,
        params: &SinkParams,
    ) -> RecorderResult<Self> {
        let mut adapter = SinkAdapter {
            channels: Vec::with_capacity(channels.len()),
            tracker: ChannelIndexTracker::new(),
            closed: false,
        };

        for (position, &channel) in channels.iter().enumerate() {
            let label = channel_label(position);
            let path = root.join(&label);
            std::fs::create_dir_all(&path).map_err(|source| RecorderError::Directory {
                path: path.clone(),
                source,
            })?;

            let sink = factory
                .create(&path, params)
                .map_err(|source| RecorderError::SinkCreate {
                    channel,
                    path: path.clone(),
                    source,
                })?;
            adapter.tracker.initialize(channel, params.start_index)?;

            tracing::info!(
                "channel {} archives to {} from index {}",
                channel,
                path.display(),
                params.start_index
            );
            adapter.channels.push(ChannelState {
                channel,
                label,
                path,
                sink,
            });
        }

        Ok(adapter)
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn tracker(&self) -> &ChannelIndexTracker {
        &self.tracker
    }

    /// Writes the batch of the channel at `slot` at its next index and
    /// advances that index. Empty batches touch nothing. Returns the new
    /// next index.
    pub fn write(&mut self, slot: usize, samples: &[Sample]) -> RecorderResult<u64> {
        let state = self
            .channels
            .get_mut(slot)
            .ok_or(RecorderError::UnknownChannel(slot))?;
        let index = self
            .tracker
            .next_index(state.channel)
            .ok_or(RecorderError::UnknownChannel(state.channel))?;
        if samples.is_empty() {
            return Ok(index);
        }

        state
            .sink
            .write(index, samples)
            .map_err(|source| RecorderError::SinkWrite {
                channel: state.channel,
                index,
                source,
            })?;
        self.tracker.advance(state.channel, samples.len() as u64)
    }

    /// Moves the channel at `slot` forward to `index`, leaving a gap in its
    /// archive. Returns the gap length.
    pub fn skip_to(&mut self, slot: usize, index: u64) -> RecorderResult<u64> {
        let channel = self
            .channels
            .get(slot)
            .map(|c| c.channel)
            .ok_or(RecorderError::UnknownChannel(slot))?;
        self.tracker.skip_to(channel, index)
    }

    /// Closes every sink, reporting the first failure.
    pub fn close(&mut self) -> RecorderResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for state in &mut self.channels {
            let index = self.tracker.next_index(state.channel).unwrap_or_default();
            match state.sink.close() {
                Ok(()) => tracing::info!(
                    "{} (channel {}) closed at index {} in {}",
                    state.label,
                    state.channel,
                    index,
                    state.path.display()
                ),
                Err(source) => {
                    tracing::error!("closing archive for channel {} failed: {}", state.channel, source);
                    first_error.get_or_insert(RecorderError::SinkWrite {
                        channel: state.channel,
                        index,
                        source,
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SinkAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("archive close on drop: {}", e);
        }
    }
}
