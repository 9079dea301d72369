use crate::clock_sync::Clock;
use crate::config::ChannelSet;
use crate::error::{RadioError, SinkError};
use crate::radio::{RadioFrontEnd, RecvOutcome, Sample, SensorValue, GPS_LOCKED_SENSOR, GPS_TIME_SENSOR};
use crate::sink::{ArchivalSink, SinkFactory, SinkParams};
use crate::time::AbsoluteTime;
use num_complex::Complex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock that only moves when something sleeps on it.
pub struct ManualClock {
    now: Mutex<AbsoluteTime>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn at(now: AbsoluteTime) -> Self {
        ManualClock {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> AbsoluteTime {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        let mut now = self.now.lock().unwrap();
        *now = *now + duration;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub path: PathBuf,
    pub index: u64,
    pub len: usize,
    pub first: Option<Sample>,
}

#[derive(Default)]
struct SinkLog {
    created: Vec<PathBuf>,
    writes: Vec<WriteRecord>,
    closed: usize,
}

/// Sink factory that keeps every call in memory.
#[derive(Clone, Default)]
pub struct RecordingSinkFactory {
    log: Arc<Mutex<SinkLog>>,
    fail_create: bool,
    fail_write_at: Option<u64>,
}

impl RecordingSinkFactory {
    pub fn failing_create() -> Self {
        RecordingSinkFactory {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn failing_write_at(index: u64) -> Self {
        RecordingSinkFactory {
            fail_write_at: Some(index),
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().created.clone()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.log.lock().unwrap().writes.clone()
    }

    pub fn writes_to(&self, path: &Path) -> Vec<WriteRecord> {
        self.writes().into_iter().filter(|w| w.path == path).collect()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn create(&self, path: &Path, _params: &SinkParams) -> Result<Box<dyn ArchivalSink>, SinkError> {
        if self.fail_create {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "refused",
            )));
        }
        self.log.lock().unwrap().created.push(path.to_path_buf());
        Ok(Box::new(RecordingSink {
            path: path.to_path_buf(),
            log: self.log.clone(),
            fail_write_at: self.fail_write_at,
        }))
    }
}

struct RecordingSink {
    path: PathBuf,
    log: Arc<Mutex<SinkLog>>,
    fail_write_at: Option<u64>,
}

impl ArchivalSink for RecordingSink {
    fn write(&mut self, index: u64, samples: &[Sample]) -> Result<(), SinkError> {
        if self.fail_write_at == Some(index) {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.log.lock().unwrap().writes.push(WriteRecord {
            path: self.path.clone(),
            index,
            len: samples.len(),
            first: samples.first().copied(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Samples(usize),
    SamplesAt(usize, AbsoluteTime),
    Overflow,
    Timeout,
    Error(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    OpenStream(Vec<usize>),
    SetTime(AbsoluteTime),
    SetTimeAtNextPulse(AbsoluteTime),
    StreamStart(AbsoluteTime),
    StreamStop,
}

/// Radio that replays a fixed list of receive outcomes and raises `stop`
/// once the list runs out.
pub struct ScriptedRadio {
    pub channels: usize,
    pub samps_per_buff: usize,
    pub time: AbsoluteTime,
    pub gps_time: i64,
    /// Number of `gps_locked` reads that report no lock
    pub unlocked_polls: u32,
    pub script: VecDeque<Scripted>,
    pub events: Vec<RadioEvent>,
    stop: Option<Arc<AtomicBool>>,
    gps_polls: AtomicU32,
    batches: i16,
}

impl ScriptedRadio {
    pub fn new(channels: usize, time: AbsoluteTime) -> Self {
        ScriptedRadio {
            channels,
            samps_per_buff: 4096,
            time,
            gps_time: time.whole_secs(),
            unlocked_polls: 0,
            script: VecDeque::new(),
            events: Vec::new(),
            stop: None,
            gps_polls: AtomicU32::new(0),
            batches: 0,
        }
    }

    pub fn with_script(mut self, script: impl IntoIterator<Item = Scripted>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    pub fn stop_when_done(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn gps_polls(&self) -> u32 {
        self.gps_polls.load(Ordering::SeqCst)
    }
}

impl RadioFrontEnd for ScriptedRadio {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn open_stream(&mut self, channels: &ChannelSet) -> Result<usize, RadioError> {
        self.events.push(RadioEvent::OpenStream(channels.as_slice().to_vec()));
        Ok(self.samps_per_buff)
    }

    fn current_time(&self) -> Result<AbsoluteTime, RadioError> {
        Ok(self.time)
    }

    fn last_pulse_time(&self) -> Result<AbsoluteTime, RadioError> {
        Ok(AbsoluteTime::new(self.time.whole_secs(), 0))
    }

    fn set_time(&mut self, time: AbsoluteTime) -> Result<(), RadioError> {
        self.events.push(RadioEvent::SetTime(time));
        self.time = time;
        Ok(())
    }

    fn set_time_at_next_pulse(&mut self, time: AbsoluteTime) -> Result<(), RadioError> {
        self.events.push(RadioEvent::SetTimeAtNextPulse(time));
        self.time = time;
        Ok(())
    }

    fn sensor(&self, name: &str) -> Result<SensorValue, RadioError> {
        match name {
            GPS_LOCKED_SENSOR => {
                let polls = self.gps_polls.fetch_add(1, Ordering::SeqCst);
                Ok(SensorValue::Bool(polls >= self.unlocked_polls))
            }
            GPS_TIME_SENSOR => Ok(SensorValue::Int(self.gps_time)),
            other => Err(RadioError::Sensor {
                name: other.to_string(),
                reason: "no such sensor".into(),
            }),
        }
    }

    fn issue_stream_start(&mut self, at: AbsoluteTime) -> Result<(), RadioError> {
        self.events.push(RadioEvent::StreamStart(at));
        Ok(())
    }

    fn issue_stream_stop(&mut self) -> Result<(), RadioError> {
        self.events.push(RadioEvent::StreamStop);
        Ok(())
    }

    fn receive(&mut self, buffers: &mut [Vec<Sample>], _max_samples: usize) -> RecvOutcome {
        let (count, time) = match self.script.pop_front() {
            Some(Scripted::Samples(count)) => (count, None),
            Some(Scripted::SamplesAt(count, time)) => (count, Some(time)),
            Some(Scripted::Overflow) => return RecvOutcome::Overflow { out_of_sequence: true },
            Some(Scripted::Timeout) => return RecvOutcome::Timeout,
            Some(Scripted::Error(reason)) => return RecvOutcome::Error(reason.to_string()),
            None => {
                if let Some(stop) = &self.stop {
                    stop.store(true, Ordering::SeqCst);
                }
                return RecvOutcome::Samples { count: 0, time: None };
            }
        };

        if count > 0 {
            self.batches += 1;
        }
        for (channel, buffer) in buffers.iter_mut().enumerate() {
            for sample in buffer.iter_mut().take(count) {
                *sample = Complex::new(self.batches, channel as i16);
            }
        }
        RecvOutcome::Samples { count, time }
    }
}
