use crate::acquisition::AcquisitionLoop;
use crate::archive::ArchiveFactory;
use crate::clock_sync::{Clock, ClockSynchronizer, SystemClock};
use crate::config::AppConfig;
use crate::error::RecorderResult;
use crate::index::ChannelIndex;
use crate::radio::{open_radio, RadioFrontEnd};
use crate::scheduler::{StreamScheduler, StreamStart};
use crate::sink::{SampleFormat, SinkAdapter, SinkFactory, SinkParams};
use crate::stats::{AcquisitionStats, StatsSnapshot};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What a finished recording run produced.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub start: StreamStart,
    pub uuid: String,
    pub channels: Vec<ChannelIndex>,
    pub stats: StatsSnapshot,
}

/// Runs one recording session against an already opened radio.
///
/// Channels are validated before the stream is touched, the device clock is
/// synchronized, the start instant is planned and every sink exists before
/// the timed start command goes out. The stream is stopped and the sinks are
/// closed on every exit path after streaming began.
pub fn run_recording(
    radio: &mut dyn RadioFrontEnd,
    factory: &dyn SinkFactory,
    clock: &dyn Clock,
    config: &AppConfig,
    stats: &AcquisitionStats,
    stop: &AtomicBool,
) -> RecorderResult<RecordingSummary> {
    config.validate()?;
    let channels = config.radio.channels()?;
    channels.validate(radio.channel_count())?;
    let rate = config.radio.sample_rate()?;

    let samps_per_buff = radio.open_stream(&channels)?;
    tracing::info!(
        "recording channel(s) {:?} at {}, {} samples per buffer",
        channels.as_slice(),
        rate,
        samps_per_buff
    );

    ClockSynchronizer::new(clock, config.acquisition.sync_settings(), stop)
        .synchronize(radio, config.radio.time_reference)?;

    let scheduler = StreamScheduler::new(rate, config.acquisition.start_lead()?);
    let start = scheduler.plan(&*radio)?;

    let uuid = config.archive.uuid_or_generate();
    let params = SinkParams {
        format: SampleFormat::Sc16,
        rate,
        start_index: start.global_start_index,
        uuid: uuid.clone(),
        layout: config.archive.layout.clone(),
    };
    let mut adapter = SinkAdapter::create(&config.archive.output_directory, &channels, factory, &params)?;

    scheduler.issue(radio, &start)?;

    let result = AcquisitionLoop::new(
        radio,
        &mut adapter,
        clock,
        stats,
        samps_per_buff,
        rate,
        config.acquisition.discontinuity,
        config.acquisition.idle_backoff(),
    )
    .run(stop);

    if let Err(e) = radio.issue_stream_stop() {
        tracing::warn!("stopping stream: {}", e);
    }
    let summary = RecordingSummary {
        start,
        uuid,
        channels: adapter.tracker().entries().to_vec(),
        stats: stats.snapshot(),
    };
    let closed = adapter.close();

    result?;
    closed?;
    for entry in &summary.channels {
        tracing::info!(
            "channel {}: {} samples written, {} skipped, next index {}",
            entry.channel,
            entry.written,
            entry.gap_samples,
            entry.next
        );
    }
    Ok(summary)
}

/// Opens the configured radio and records into the on-disk archive on a
/// blocking thread until `stop` is raised.
pub fn start_recorder(
    config: AppConfig,
    stats: Arc<AcquisitionStats>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<RecorderResult<RecordingSummary>> {
    tokio::task::spawn_blocking(move || {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut radio = open_radio(&config.radio, clock.clone())?;
        run_recording(
            radio.as_mut(),
            &ArchiveFactory,
            clock.as_ref(),
            &config,
            &stats,
            &stop,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::DiscontinuityPolicy;
    use crate::archive::{list_files, read_blocks, read_checkpoint, read_properties, verify_channel};
    use crate::config::{Driver, TimeReference};
    use crate::error::{ConfigError, RecorderError};
    use crate::simulated::{SimulatedRadio, SimulatedSettings};
    use crate::test_support::{ManualClock, RadioEvent, RecordingSinkFactory, Scripted, ScriptedRadio};
    use crate::time::AbsoluteTime;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir, channels: &str) -> anyhow::Result<AppConfig> {
        let mut cfg = AppConfig::load_default()?;
        cfg.radio.channel_list = channels.to_string();
        cfg.archive.output_directory = dir.path().to_path_buf();
        cfg.archive.uuid = Some("session".into());
        Ok(cfg)
    }

    #[test]
    fn test_channel_beyond_radio_rejected_before_streaming() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cfg = config(&dir, "2")?;
        let factory = RecordingSinkFactory::default();
        let clock = ManualClock::at(AbsoluteTime::new(1000, 0));
        let mut radio = ScriptedRadio::new(2, AbsoluteTime::new(0, 0));

        let result = run_recording(
            &mut radio,
            &factory,
            &clock,
            &cfg,
            &AcquisitionStats::new(),
            &AtomicBool::new(false),
        );

        assert!(matches!(
            result,
            Err(RecorderError::Config(ConfigError::InvalidChannel { channel: 2, available: 2 }))
        ));
        assert!(radio.events.is_empty());
        assert!(factory.created().is_empty());
        Ok(())
    }

    #[test]
    fn test_single_channel_session() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cfg = config(&dir, "0")?;
        let factory = RecordingSinkFactory::default();
        let clock = ManualClock::at(AbsoluteTime::new(1000, 0));
        let stop = Arc::new(AtomicBool::new(false));
        let mut radio = ScriptedRadio::new(2, AbsoluteTime::new(0, 0))
            .with_script(vec![Scripted::Samples(4096), Scripted::Samples(4096), Scripted::Samples(2048)])
            .stop_when_done(stop.clone());

        let summary = run_recording(&mut radio, &factory, &clock, &cfg, &AcquisitionStats::new(), &stop)?;

        let start = AbsoluteTime::new(1002, 0);
        assert_eq!(
            radio.events,
            vec![
                RadioEvent::OpenStream(vec![0]),
                RadioEvent::SetTime(AbsoluteTime::new(1000, 0)),
                RadioEvent::StreamStart(start),
                RadioEvent::StreamStop,
            ]
        );
        assert_eq!(factory.created(), vec![dir.path().join("cha")]);
        assert_eq!(factory.closed(), 1);

        assert_eq!(summary.start.global_start_index, 25_050_000_000);
        assert_eq!(summary.uuid, "session");
        assert_eq!(summary.channels.len(), 1);
        assert_eq!(summary.channels[0].next, 25_050_000_000 + 10240);
        assert_eq!(summary.stats.samples, 10240);
        Ok(())
    }

    #[test]
    fn test_two_channel_session() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cfg = config(&dir, "0,1")?;
        let factory = RecordingSinkFactory::default();
        let clock = ManualClock::at(AbsoluteTime::new(1000, 0));
        let stop = Arc::new(AtomicBool::new(false));
        let mut radio = ScriptedRadio::new(2, AbsoluteTime::new(0, 0))
            .with_script(vec![Scripted::Samples(100)])
            .stop_when_done(stop.clone());

        let summary = run_recording(&mut radio, &factory, &clock, &cfg, &AcquisitionStats::new(), &stop)?;

        assert_eq!(
            factory.created(),
            vec![dir.path().join("cha"), dir.path().join("chb")]
        );
        assert_eq!(factory.writes_to(&dir.path().join("chb")).len(), 1);
        assert!(summary.channels.iter().all(|c| c.next == summary.start.global_start_index + 100));
        Ok(())
    }

    #[test]
    fn test_cancelled_gps_wait_creates_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut cfg = config(&dir, "0")?;
        cfg.radio.time_reference = TimeReference::Gpsdo;
        let factory = RecordingSinkFactory::default();
        let clock = ManualClock::at(AbsoluteTime::new(1000, 0));
        let mut radio = ScriptedRadio::new(1, AbsoluteTime::new(0, 0));
        radio.unlocked_polls = u32::MAX;

        let result = run_recording(
            &mut radio,
            &factory,
            &clock,
            &cfg,
            &AcquisitionStats::new(),
            &AtomicBool::new(true),
        );

        assert!(matches!(result, Err(RecorderError::Cancelled)));
        assert!(factory.created().is_empty());
        assert!(!radio.events.contains(&RadioEvent::StreamStart(AbsoluteTime::new(1002, 0))));
        Ok(())
    }

    #[test]
    fn test_halt_stops_stream_and_closes_sinks() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut cfg = config(&dir, "0")?;
        cfg.acquisition.discontinuity = DiscontinuityPolicy::Halt;
        let factory = RecordingSinkFactory::default();
        let clock = ManualClock::at(AbsoluteTime::new(1000, 0));
        let stop = Arc::new(AtomicBool::new(false));
        let mut radio = ScriptedRadio::new(1, AbsoluteTime::new(0, 0))
            .with_script(vec![Scripted::Samples(10), Scripted::Overflow])
            .stop_when_done(stop.clone());

        let result = run_recording(&mut radio, &factory, &clock, &cfg, &AcquisitionStats::new(), &stop);

        assert!(matches!(result, Err(RecorderError::DataDiscontinuity { .. })));
        assert_eq!(radio.events.last(), Some(&RadioEvent::StreamStop));
        assert_eq!(factory.closed(), 1);
        Ok(())
    }

    /// Manual clock that raises `stop` once it reaches `deadline`.
    struct DeadlineClock {
        inner: ManualClock,
        deadline: AbsoluteTime,
        stop: Arc<AtomicBool>,
    }

    impl Clock for DeadlineClock {
        fn now(&self) -> AbsoluteTime {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.now() >= self.deadline {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_simulated_radio_into_archive() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut cfg = config(&dir, "0,1")?;
        cfg.radio.driver = Driver::Simulated;
        cfg.radio.sample_rate = 1000.0;

        let stop = Arc::new(AtomicBool::new(false));
        let clock = Arc::new(DeadlineClock {
            inner: ManualClock::at(AbsoluteTime::new(1000, 0)),
            deadline: AbsoluteTime::new(1010, 0),
            stop: stop.clone(),
        });
        let mut radio = SimulatedRadio::new(SimulatedSettings::from_config(&cfg.radio)?, clock.clone());
        let stats = AcquisitionStats::new();

        let summary = run_recording(&mut radio, &ArchiveFactory, clock.as_ref(), &cfg, &stats, &stop)?;

        // 2040 sample batches at 1 kHz from 1002 s until the clock passes 1010 s
        let start = 1_002_000;
        assert_eq!(summary.start.global_start_index, start);
        assert_eq!(summary.stats.timeouts, 1);
        assert_eq!(summary.stats.samples, 4 * 2040);

        for label in ["cha", "chb"] {
            let channel_dir = dir.path().join(label);
            assert_eq!(read_properties(&channel_dir)?.global_start_index, start);
            assert_eq!(read_checkpoint(&channel_dir)?.unwrap().next_index, start + 8160);

            let mut expected = start;
            for file in list_files(&channel_dir)? {
                for block in read_blocks(&file)? {
                    assert_eq!(block.start_index, expected);
                    expected += block.samples.len() as u64;
                }
            }
            assert_eq!(expected, start + 8160);

            let report = verify_channel(&channel_dir)?;
            assert_eq!(report.samples, 8160);
            assert_eq!(report.gap_samples, 0);
            assert_eq!(report.checkpoint_index, Some(start + 8160));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_start_recorder_stops_when_asked() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut cfg = config(&dir, "0")?;
        cfg.radio.driver = Driver::Simulated;
        cfg.radio.sample_rate = 1000.0;
        let stop = Arc::new(AtomicBool::new(true));

        let summary = start_recorder(cfg, Arc::new(AcquisitionStats::new()), stop).await??;

        assert_eq!(summary.channels[0].written, 0);
        assert!(dir.path().join("cha").join("archive_properties.json").exists());
        Ok(())
    }
}
