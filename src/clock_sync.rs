use crate::config::TimeReference;
use crate::error::{RadioError, RecorderError, RecorderResult};
use crate::radio::{RadioFrontEnd, GPS_LOCKED_SENSOR, GPS_TIME_SENSOR};
use crate::time::AbsoluteTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Host time and sleeping, swappable so waits can be simulated.
pub trait Clock: Send + Sync {
    fn now(&self) -> AbsoluteTime;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> AbsoluteTime {
        AbsoluteTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Wait after arming the PPS load before the device time is trusted
    pub settle: Duration,
    /// `None` waits for GPS lock indefinitely
    pub lock_timeout: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            lock_timeout: None,
        }
    }
}

/// Sets the device clock according to the configured time reference.
pub struct ClockSynchronizer<'a> {
    clock: &'a dyn Clock,
    settings: SyncSettings,
    stop: &'a AtomicBool,
}

impl<'a> ClockSynchronizer<'a> {
    pub fn new(clock: &'a dyn Clock, settings: SyncSettings, stop: &'a AtomicBool) -> Self {
        ClockSynchronizer { clock, settings, stop }
    }

    /// Returns the time the device clock was set to, or the device time it
    /// already had when an external reference drives it.
    pub fn synchronize(
        &self,
        radio: &mut dyn RadioFrontEnd,
        reference: TimeReference,
    ) -> RecorderResult<AbsoluteTime> {
        match reference {
            TimeReference::Default => {
                let now = self.clock.now();
                radio.set_time(now)?;
                tracing::info!("device time set from host clock: {}", now);
                Ok(now)
            }
            TimeReference::Gpsdo => self.sync_to_gps(radio),
            TimeReference::External => {
                let now = radio.current_time()?;
                tracing::info!("device time follows external reference: {}", now);
                Ok(now)
            }
        }
    }

    fn sync_to_gps(&self, radio: &mut dyn RadioFrontEnd) -> RecorderResult<AbsoluteTime> {
        self.wait_for_gps_lock(radio)?;

        let gps_time = radio
            .sensor(GPS_TIME_SENSOR)?
            .as_int()
            .ok_or_else(|| RadioError::Sensor {
                name: GPS_TIME_SENSOR.into(),
                reason: "not an integer".into(),
            })?;
        let target = AbsoluteTime::new(gps_time + 1, 0);
        radio.set_time_at_next_pulse(target)?;

        // The time latched at the last PPS edge is unreliable until the
        // new value has been loaded.
        self.clock.sleep(self.settings.settle);

        let now = radio.current_time()?;
        let last_pulse = radio.last_pulse_time()?;
        tracing::info!(
            "device time now {:.4}, last pps {:.4}",
            now.as_secs_f64(),
            last_pulse.as_secs_f64()
        );
        Ok(target)
    }

    /// Polls the lock sensor until it reports lock, the optional timeout
    /// expires or `stop` is raised.
    fn wait_for_gps_lock(&self, radio: &dyn RadioFrontEnd) -> RecorderResult<()> {
        tracing::info!("waiting for GPS lock");
        let mut waited = Duration::ZERO;

        loop {
            let locked = radio
                .sensor(GPS_LOCKED_SENSOR)?
                .as_bool()
                .ok_or_else(|| RadioError::Sensor {
                    name: GPS_LOCKED_SENSOR.into(),
                    reason: "not a boolean".into(),
                })?;
            if locked {
                tracing::info!("GPS locked after {:?}", waited);
                return Ok(());
            }

            if let Some(limit) = self.settings.lock_timeout {
                if waited >= limit {
                    return Err(RecorderError::GpsLockTimeout(waited));
                }
            }
            if self.stop.load(Ordering::SeqCst) {
                return Err(RecorderError::Cancelled);
            }

            tracing::warn!("no GPS lock, waiting for lock ({:?} so far)", waited);
            self.clock.sleep(self.settings.poll_interval);
            waited += self.settings.poll_interval;
        }
    }
}
