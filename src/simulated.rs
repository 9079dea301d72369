use crate::clock_sync::Clock;
use crate::config::{ChannelSet, RadioConfig};
use crate::error::{ConfigError, RadioError};
use crate::radio::{RadioFrontEnd, RecvOutcome, Sample, SensorValue, GPS_LOCKED_SENSOR, GPS_TIME_SENSOR};
use crate::time::{AbsoluteTime, SampleRate};
use num_complex::Complex;
use rand::Rng;
use std::f64::consts::{FRAC_PI_2, TAU};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-channel buffer length the simulated stream asks for.
pub const SIMULATED_SAMPS_PER_BUFF: usize = 2040;

const SIMULATED_CHANNELS: usize = 2;
const TONE_AMPLITUDE: f64 = 8000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSettings {
    pub channels: usize,
    pub rate: SampleRate,
    /// Offset of the test tone from the center frequency
    pub tone_hz: f64,
    pub noise_amplitude: i16,
    /// `gps_locked` reads reporting no lock before the GPSDO locks
    pub gps_lock_after_polls: u32,
    pub recv_timeout: Duration,
    /// How far the stream may fall behind device time before it overflows
    pub overflow_after: Duration,
}

impl SimulatedSettings {
    pub fn from_config(cfg: &RadioConfig) -> Result<Self, ConfigError> {
        let rate = cfg.sample_rate()?;
        let recv_timeout = Duration::try_from_secs_f64(cfg.recv_timeout_secs).map_err(|_| {
            ConfigError::Invalid(format!("receive timeout {} s", cfg.recv_timeout_secs))
        })?;
        Ok(SimulatedSettings {
            channels: SIMULATED_CHANNELS,
            rate,
            tone_hz: rate.as_hz() / 100.0,
            noise_amplitude: 64,
            gps_lock_after_polls: 0,
            recv_timeout,
            overflow_after: Duration::from_secs(1),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct TimeLoad {
    host: AbsoluteTime,
    device: AbsoluteTime,
}

/// A two-channel receiver that synthesizes a tone over noise and paces
/// itself against a [`Clock`].
pub struct SimulatedRadio {
    settings: SimulatedSettings,
    clock: Arc<dyn Clock>,
    /// Device time equals `device + (host now - host)` for the latest load
    loaded: TimeLoad,
    pending_pulse_load: Option<TimeLoad>,
    open_channels: Option<Vec<usize>>,
    stream_start: Option<AbsoluteTime>,
    emitted: u64,
    gps_polls: AtomicU32,
}

impl SimulatedRadio {
    pub fn new(settings: SimulatedSettings, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        SimulatedRadio {
            settings,
            clock,
            loaded: TimeLoad {
                host: now,
                device: now,
            },
            pending_pulse_load: None,
            open_channels: None,
            stream_start: None,
            emitted: 0,
            gps_polls: AtomicU32::new(0),
        }
    }

    fn device_time(&self) -> AbsoluteTime {
        let host = self.clock.now();
        let load = match self.pending_pulse_load {
            Some(pending) if host >= pending.host => pending,
            _ => self.loaded,
        };
        load.device + host.duration_since(load.host).unwrap_or_default()
    }

    fn fill(&self, buffers: &mut [Vec<Sample>], count: usize) {
        let mut rng = rand::thread_rng();
        let noise = self.settings.noise_amplitude.max(0);
        let step = TAU * self.settings.tone_hz / self.settings.rate.as_hz();

        for (slot, buffer) in buffers.iter_mut().enumerate() {
            let offset = slot as f64 * FRAC_PI_2;
            for (i, sample) in buffer.iter_mut().take(count).enumerate() {
                let phase = step * (self.emitted + i as u64) as f64 + offset;
                let re = TONE_AMPLITUDE * phase.cos();
                let im = TONE_AMPLITUDE * phase.sin();
                *sample = Complex::new(
                    re as i16 + rng.gen_range(-noise..=noise),
                    im as i16 + rng.gen_range(-noise..=noise),
                );
            }
        }
    }
}

impl RadioFrontEnd for SimulatedRadio {
    fn channel_count(&self) -> usize {
        self.settings.channels
    }

    fn open_stream(&mut self, channels: &ChannelSet) -> Result<usize, RadioError> {
        if let Some(&bad) = channels.iter().find(|&&c| c >= self.settings.channels) {
            return Err(RadioError::InvalidArgument(format!(
                "channel {} on a {} channel device",
                bad, self.settings.channels
            )));
        }
        self.open_channels = Some(channels.as_slice().to_vec());
        Ok(SIMULATED_SAMPS_PER_BUFF)
    }

    fn current_time(&self) -> Result<AbsoluteTime, RadioError> {
        Ok(self.device_time())
    }

    fn last_pulse_time(&self) -> Result<AbsoluteTime, RadioError> {
        Ok(AbsoluteTime::new(self.device_time().whole_secs(), 0))
    }

    fn set_time(&mut self, time: AbsoluteTime) -> Result<(), RadioError> {
        self.loaded = TimeLoad {
            host: self.clock.now(),
            device: time,
        };
        self.pending_pulse_load = None;
        Ok(())
    }

    fn set_time_at_next_pulse(&mut self, time: AbsoluteTime) -> Result<(), RadioError> {
        let device = self.device_time();
        let edge = AbsoluteTime::new(device.whole_secs() + 1, 0);
        let host = self.clock.now() + edge.duration_since(device).unwrap_or_default();
        self.pending_pulse_load = Some(TimeLoad { host, device: time });
        Ok(())
    }

    fn sensor(&self, name: &str) -> Result<SensorValue, RadioError> {
        match name {
            GPS_LOCKED_SENSOR => {
                let polls = self.gps_polls.fetch_add(1, Ordering::Relaxed);
                Ok(SensorValue::Bool(polls >= self.settings.gps_lock_after_polls))
            }
            GPS_TIME_SENSOR => Ok(SensorValue::Int(self.clock.now().whole_secs())),
            other => Err(RadioError::Sensor {
                name: other.to_string(),
                reason: "not provided by the simulated radio".into(),
            }),
        }
    }

    fn issue_stream_start(&mut self, at: AbsoluteTime) -> Result<(), RadioError> {
        if self.open_channels.is_none() {
            return Err(RadioError::StreamNotOpen);
        }
        self.stream_start = Some(at);
        self.emitted = 0;
        Ok(())
    }

    fn issue_stream_stop(&mut self) -> Result<(), RadioError> {
        self.stream_start = None;
        Ok(())
    }

    fn receive(&mut self, buffers: &mut [Vec<Sample>], max_samples: usize) -> RecvOutcome {
        let Some(start) = self.stream_start else {
            self.clock.sleep(self.settings.recv_timeout);
            return RecvOutcome::Timeout;
        };
        let count = buffers
            .iter()
            .map(Vec::len)
            .min()
            .unwrap_or(0)
            .min(max_samples);
        let rate = self.settings.rate;
        let batch_time = start + rate.duration_of(self.emitted);
        let batch_end = start + rate.duration_of(self.emitted + count as u64);

        let now = self.device_time();
        match batch_end.duration_since(now) {
            Some(wait) if wait > self.settings.recv_timeout => {
                self.clock.sleep(self.settings.recv_timeout);
                return RecvOutcome::Timeout;
            }
            Some(wait) => self.clock.sleep(wait),
            None => {
                let behind = now.duration_since(batch_end).unwrap_or_default();
                if behind > self.settings.overflow_after {
                    // drop everything the host failed to collect
                    let elapsed = now.duration_since(start).unwrap_or_default();
                    let epoch = AbsoluteTime::new(0, 0);
                    self.emitted = (epoch + elapsed).sample_index(rate).unwrap_or(self.emitted);
                    return RecvOutcome::Overflow {
                        out_of_sequence: false,
                    };
                }
            }
        }

        self.fill(buffers, count);
        self.emitted += count as u64;
        RecvOutcome::Samples {
            count,
            time: Some(batch_time),
        }
    }
}
