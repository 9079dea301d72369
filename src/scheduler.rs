use crate::error::{RecorderError, RecorderResult};
use crate::radio::RadioFrontEnd;
use crate::time::{AbsoluteTime, SampleRate};
use std::time::Duration;

/// Longer than the command round trip to every channel of the radio.
pub const DEFAULT_START_LEAD: Duration = Duration::from_secs(2);

/// When streaming starts and the sample index of its first sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStart {
    pub instant: AbsoluteTime,
    pub global_start_index: u64,
}

pub struct StreamScheduler {
    rate: SampleRate,
    lead: Duration,
}

impl StreamScheduler {
    pub fn new(rate: SampleRate, lead: Duration) -> Self {
        StreamScheduler { rate, lead }
    }

    /// Picks a start instant `lead` after the device's current time.
    pub fn plan(&self, radio: &dyn RadioFrontEnd) -> RecorderResult<StreamStart> {
        let now = radio.current_time()?;
        self.start_after(now)
    }

    pub fn start_after(&self, now: AbsoluteTime) -> RecorderResult<StreamStart> {
        let instant = now + self.lead;
        let global_start_index = instant
            .sample_index(self.rate)
            .ok_or(RecorderError::StartIndex(instant))?;
        Ok(StreamStart {
            instant,
            global_start_index,
        })
    }

    /// Issues one timed start command for every open channel. Fails without
    /// touching the stream when the start instant has already passed.
    pub fn issue(&self, radio: &mut dyn RadioFrontEnd, start: &StreamStart) -> RecorderResult<()> {
        let now = radio.current_time()?;
        if now >= start.instant {
            return Err(RecorderError::StartMissed {
                start: start.instant,
                now,
            });
        }
        radio.issue_stream_start(start.instant)?;
        tracing::info!(
            "streaming will start at {} (index {})",
            start.instant,
            start.global_start_index
        );
        Ok(())
    }
}
