use crate::error::{RecorderError, RecorderResult};

/// Write position of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIndex {
    pub channel: usize,
    pub start: u64,
    pub next: u64,
    /// Samples handed to the sink so far
    pub written: u64,
    /// Samples skipped over after a recorded discontinuity
    pub gap_samples: u64,
}

/// Per-channel absolute sample index of the next write.
///
/// `next == start + written + gap_samples` holds for every channel at all
/// times, and `next` never decreases.
#[derive(Debug, Clone, Default)]
pub struct ChannelIndexTracker {
    entries: Vec<ChannelIndex>,
}

impl ChannelIndexTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `channel` at `start`. Repeating the call with the same start
    /// before any progress is a no-op; anything else would move a live index.
    pub fn initialize(&mut self, channel: usize, start: u64) -> RecorderResult<()> {
        match self.entries.iter().find(|e| e.channel == channel) {
            None => {
                self.entries.push(ChannelIndex {
                    channel,
                    start,
                    next: start,
                    written: 0,
                    gap_samples: 0,
                });
                Ok(())
            }
            Some(e) if e.start == start && e.next == start => Ok(()),
            Some(e) => Err(RecorderError::IndexReset {
                channel,
                current: e.next,
                requested: start,
            }),
        }
    }

    /// Moves past `count` written samples; returns the new next index.
    pub fn advance(&mut self, channel: usize, count: u64) -> RecorderResult<u64> {
        let entry = self.entry_mut(channel)?;
        entry.next += count;
        entry.written += count;
        Ok(entry.next)
    }

    /// Moves the index forward to `index`, recording the skipped span as a
    /// gap. Targets at or behind the current index change nothing. Returns
    /// the number of samples skipped.
    pub fn skip_to(&mut self, channel: usize, index: u64) -> RecorderResult<u64> {
        let entry = self.entry_mut(channel)?;
        if index <= entry.next {
            return Ok(0);
        }
        let gap = index - entry.next;
        entry.next = index;
        entry.gap_samples += gap;
        Ok(gap)
    }

    pub fn next_index(&self, channel: usize) -> Option<u64> {
        self.get(channel).map(|e| e.next)
    }

    pub fn get(&self, channel: usize) -> Option<&ChannelIndex> {
        self.entries.iter().find(|e| e.channel == channel)
    }

    pub fn entries(&self) -> &[ChannelIndex] {
        &self.entries
    }

    fn entry_mut(&mut self, channel: usize) -> RecorderResult<&mut ChannelIndex> {
        self.entries
            .iter_mut()
            .find(|e| e.channel == channel)
            .ok_or(RecorderError::UnknownChannel(channel))
    }
}
