use crate::clock_sync::Clock;
use crate::error::{RadioError, RecorderError, RecorderResult};
use crate::radio::{RadioFrontEnd, RecvOutcome, Sample};
use crate::sink::SinkAdapter;
use crate::stats::AcquisitionStats;
use crate::time::{AbsoluteTime, SampleRate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// What to do when the radio reports dropped samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DiscontinuityPolicy {
    /// Stop recording with `DataDiscontinuity`
    Halt,
    /// Place the next timestamped batch at its own index, leaving a gap
    #[default]
    Realign,
    /// Keep writing contiguously as if nothing was lost
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Wrote(usize),
    Idle,
    Discontinuity,
}

/// The pull-then-persist cycle. Owns one reusable buffer per channel.
pub struct AcquisitionLoop<'a> {
    radio: &'a mut dyn RadioFrontEnd,
    adapter: &'a mut SinkAdapter,
    clock: &'a dyn Clock,
    stats: &'a AcquisitionStats,
    buffers: Vec<Vec<Sample>>,
    samps_per_buff: usize,
    rate: SampleRate,
    policy: DiscontinuityPolicy,
    idle_backoff: Option<Duration>,
    realign_pending: bool,
}

impl<'a> AcquisitionLoop<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio: &'a mut dyn RadioFrontEnd,
        adapter: &'a mut SinkAdapter,
        clock: &'a dyn Clock,
        stats: &'a AcquisitionStats,
        samps_per_buff: usize,
        rate: SampleRate,
        policy: DiscontinuityPolicy,
        idle_backoff: Option<Duration>,
    ) -> Self {
        let buffers = vec![vec![Sample::default(); samps_per_buff]; adapter.channels().len()];
        AcquisitionLoop {
            radio,
            adapter,
            clock,
            stats,
            buffers,
            samps_per_buff,
            rate,
            policy,
            idle_backoff,
            realign_pending: false,
        }
    }

    /// Runs until `stop` is raised or a step fails.
    pub fn run(&mut self, stop: &AtomicBool) -> RecorderResult<()> {
        while !stop.load(Ordering::Relaxed) {
            if self.step()? == Step::Idle {
                if let Some(backoff) = self.idle_backoff {
                    self.clock.sleep(backoff);
                }
            }
        }
        Ok(())
    }

    /// One receive call and, for a non-empty batch, one write per channel in
    /// configuration order.
    pub fn step(&mut self) -> RecorderResult<Step> {
        match self.radio.receive(&mut self.buffers, self.samps_per_buff) {
            RecvOutcome::Samples { count: 0, .. } => {
                self.stats.record_idle();
                Ok(Step::Idle)
            }
            RecvOutcome::Samples { count, time } => {
                if count > self.samps_per_buff {
                    return Err(RadioError::Stream(format!(
                        "received {} samples into {} sample buffers",
                        count, self.samps_per_buff
                    ))
                    .into());
                }
                if self.realign_pending {
                    self.realign(time)?;
                    self.realign_pending = false;
                }
                for (slot, buffer) in self.buffers.iter().enumerate() {
                    self.adapter.write(slot, &buffer[..count])?;
                }
                self.stats.record_batch(count);
                Ok(Step::Wrote(count))
            }
            RecvOutcome::Overflow { out_of_sequence } => self.on_overflow(out_of_sequence),
            RecvOutcome::Timeout => {
                self.stats.record_timeout();
                Ok(Step::Idle)
            }
            RecvOutcome::Error(reason) => Err(RadioError::Stream(reason).into()),
        }
    }

    fn on_overflow(&mut self, out_of_sequence: bool) -> RecorderResult<Step> {
        self.stats.record_overflow();
        let next_index = self.first_next_index();
        match self.policy {
            DiscontinuityPolicy::Halt => Err(RecorderError::DataDiscontinuity { next_index }),
            DiscontinuityPolicy::Realign => {
                tracing::warn!(
                    "overflow at index {} (out of sequence: {}), realigning on next timestamp",
                    next_index,
                    out_of_sequence
                );
                self.realign_pending = true;
                Ok(Step::Discontinuity)
            }
            DiscontinuityPolicy::Ignore => {
                tracing::warn!("overflow at index {} ignored, archive is no longer gap free", next_index);
                Ok(Step::Discontinuity)
            }
        }
    }

    /// Moves every channel to the index of `time`. A timestamp at or behind
    /// the expected index leaves the stream contiguous.
    fn realign(&mut self, time: Option<AbsoluteTime>) -> RecorderResult<()> {
        let Some(time) = time else {
            tracing::warn!("batch after overflow carries no timestamp, continuing contiguously");
            return Ok(());
        };
        let Some(target) = time.sample_index(self.rate) else {
            tracing::warn!("batch timestamp {} has no sample index, continuing contiguously", time);
            return Ok(());
        };

        for slot in 0..self.adapter.channels().len() {
            let channel = self.adapter.channels()[slot].channel;
            let gap = self.adapter.skip_to(slot, target)?;
            if gap > 0 {
                self.stats.record_gap(gap);
                tracing::warn!(
                    "channel {}: {} samples lost, resuming at index {}",
                    channel,
                    gap,
                    target
                );
            } else {
                tracing::warn!(
                    "channel {}: timestamp index {} not ahead of expected index, no gap recorded",
                    channel,
                    target
                );
            }
        }
        Ok(())
    }

    fn first_next_index(&self) -> u64 {
        self.adapter
            .channels()
            .first()
            .and_then(|c| self.adapter.tracker().next_index(c.channel))
            .unwrap_or_default()
    }
}
