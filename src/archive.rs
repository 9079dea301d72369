use crate::error::SinkError;
use crate::radio::Sample;
use crate::sink::{ArchivalSink, ArchiveLayout, SampleFormat, SinkFactory, SinkParams};
use crate::time::SampleRate;
use chrono::{DateTime, Utc};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const BLOCK_MAGIC: u32 = 0x5246_4231;
const BLOCK_HEADER_LEN: usize = 28;

pub const FLAG_COMPRESSED: u32 = 1;
pub const FLAG_CHECKSUM: u32 = 1 << 1;

pub const PROPERTIES_FILE: &str = "archive_properties.json";
pub const CHECKPOINT_FILE: &str = ".checkpoint";

/// Written once per channel directory when the archive is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveProperties {
    pub sample_rate_numerator: u64,
    pub sample_rate_denominator: u64,
    pub samples_per_second: f64,
    pub global_start_index: u64,
    pub uuid: String,
    pub sample_format: SampleFormat,
    pub layout: ArchiveLayout,
}

impl ArchiveProperties {
    fn from_params(params: &SinkParams) -> Self {
        ArchiveProperties {
            sample_rate_numerator: params.rate.numerator(),
            sample_rate_denominator: params.rate.denominator(),
            samples_per_second: params.rate.as_hz(),
            global_start_index: params.start_index,
            uuid: params.uuid.clone(),
            sample_format: params.format,
            layout: params.layout.clone(),
        }
    }
}

/// Progress marker rewritten on file rotation and close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub next_index: u64,
    pub samples_written: u64,
    pub file: Option<PathBuf>,
    pub updated_unix_ms: i64,
}

/// One decoded block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub start_index: u64,
    pub flags: u32,
    pub samples: Vec<Sample>,
}

/// Maps sample indices onto fixed-length files.
#[derive(Debug, Clone, Copy)]
struct FileGrid {
    rate: SampleRate,
    millis_per_file: u64,
    subdir_cadence_secs: u64,
}

impl FileGrid {
    /// `floor(index / samples_per_file)` with samples per file kept rational.
    fn file_number(&self, index: u64) -> u64 {
        let num = index as u128 * self.rate.denominator() as u128 * 1000;
        let den = self.rate.numerator() as u128 * self.millis_per_file as u128;
        (num / den) as u64
    }

    /// First sample index that falls into file `number`.
    fn file_start(&self, number: u64) -> u64 {
        let num = number as u128 * self.millis_per_file as u128 * self.rate.numerator() as u128;
        let den = self.rate.denominator() as u128 * 1000;
        num.div_ceil(den) as u64
    }

    fn file_path(&self, root: &Path, number: u64) -> Result<PathBuf, SinkError> {
        let start_ms = number * self.millis_per_file;
        let secs = start_ms / 1000;
        let subdir_secs = secs - secs % self.subdir_cadence_secs;
        let subdir = DateTime::<Utc>::from_timestamp(subdir_secs as i64, 0).ok_or_else(|| {
            SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("file time {} s out of range", secs),
            ))
        })?;
        Ok(root
            .join(subdir.format("%Y-%m-%dT%H-%M-%S").to_string())
            .join(format!("rf@{}.{:03}.bin", secs, start_ms % 1000)))
    }
}

struct OpenFile {
    number: u64,
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Creates an [`ArchiveWriter`] per channel directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveFactory;

impl SinkFactory for ArchiveFactory {
    fn create(&self, path: &Path, params: &SinkParams) -> Result<Box<dyn ArchivalSink>, SinkError> {
        Ok(Box::new(ArchiveWriter::create(path, params)?))
    }
}

/// Writes one channel into time-addressed block files.
pub struct ArchiveWriter {
    root: PathBuf,
    grid: FileGrid,
    layout: ArchiveLayout,
    next_index: u64,
    written: u64,
    current: Option<OpenFile>,
    closed: bool,
}

impl ArchiveWriter {
    pub fn create(root: &Path, params: &SinkParams) -> Result<Self, SinkError> {
        fs::create_dir_all(root)?;
        let properties = serde_json::to_vec_pretty(&ArchiveProperties::from_params(params))?;
        write_atomic(root, PROPERTIES_FILE, &properties)?;

        Ok(ArchiveWriter {
            root: root.to_path_buf(),
            grid: FileGrid {
                rate: params.rate,
                millis_per_file: params.layout.millis_per_file,
                subdir_cadence_secs: params.layout.subdir_cadence_secs,
            },
            layout: params.layout.clone(),
            next_index: params.start_index,
            written: 0,
            current: None,
            closed: false,
        })
    }

    #[cfg(test)]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    fn select_file(&mut self, number: u64) -> Result<(), SinkError> {
        if matches!(&self.current, Some(f) if f.number == number) {
            return Ok(());
        }
        if let Some(mut previous) = self.current.take() {
            previous.writer.flush()?;
            self.write_checkpoint(Some(previous.path.clone()))?;
        }

        let path = self.grid.file_path(&self.root, number)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!("archive file {}", path.display());
        self.current = Some(OpenFile {
            number,
            path,
            writer: BufWriter::new(file),
        });
        Ok(())
    }

    fn write_block(&mut self, start_index: u64, samples: &[Sample]) -> Result<(), SinkError> {
        let mut payload = Vec::with_capacity(samples.len() * SampleFormat::Sc16.bytes_per_sample());
        for s in samples {
            payload.extend_from_slice(&s.re.to_le_bytes());
            payload.extend_from_slice(&s.im.to_le_bytes());
        }

        let mut flags = 0;
        if self.layout.compression_level > 0 {
            payload = zstd::bulk::compress(&payload, self.layout.compression_level)?;
            flags |= FLAG_COMPRESSED;
        }
        let crc = if self.layout.checksum {
            flags |= FLAG_CHECKSUM;
            crc32fast::hash(&payload)
        } else {
            0
        };

        let mut header = Vec::with_capacity(BLOCK_HEADER_LEN);
        header.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
        header.extend_from_slice(&start_index.to_le_bytes());
        header.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        header.extend_from_slice(&flags.to_le_bytes());
        header.extend_from_slice(&crc.to_le_bytes());

        let file = self.current.as_mut().ok_or(SinkError::Closed)?;
        file.writer.write_all(&header)?;
        file.writer.write_all(&payload)?;
        Ok(())
    }

    fn write_checkpoint(&self, file: Option<PathBuf>) -> Result<(), SinkError> {
        let checkpoint = Checkpoint {
            next_index: self.next_index,
            samples_written: self.written,
            file,
            updated_unix_ms: Utc::now().timestamp_millis(),
        };
        write_atomic(&self.root, CHECKPOINT_FILE, &serde_json::to_vec(&checkpoint)?)
    }
}

impl ArchivalSink for ArchiveWriter {
    fn write(&mut self, index: u64, samples: &[Sample]) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if index < self.next_index {
            return Err(SinkError::OutOfOrder {
                expected: self.next_index,
                got: index,
            });
        }
        if index > self.next_index {
            tracing::debug!(
                "{}: gap of {} samples before index {}",
                self.root.display(),
                index - self.next_index,
                index
            );
        }

        let mut offset = 0;
        while offset < samples.len() {
            let at = index + offset as u64;
            let number = self.grid.file_number(at);
            let room = self.grid.file_start(number + 1) - at;
            let take = (samples.len() - offset).min(room as usize);

            self.select_file(number)?;
            self.write_block(at, &samples[offset..offset + take])?;
            offset += take;
            self.next_index = at + take as u64;
            self.written += take as u64;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let path = match self.current.take() {
            Some(mut f) => {
                f.writer.flush()?;
                f.writer.get_ref().sync_all()?;
                Some(f.path)
            }
            None => None,
        };
        self.write_checkpoint(path)?;
        tracing::info!(
            "closed archive {} at index {} ({} samples)",
            self.root.display(),
            self.next_index,
            self.written
        );
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("closing {} on drop: {}", self.root.display(), e);
        }
    }
}

fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> Result<(), SinkError> {
    let path = dir.join(name);
    let tmp_path = dir.join(format!("{}.tmp", name));
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

pub fn read_properties(dir: &Path) -> Result<ArchiveProperties, SinkError> {
    let data = fs::read(dir.join(PROPERTIES_FILE))?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn read_checkpoint(dir: &Path) -> Result<Option<Checkpoint>, SinkError> {
    let path = dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Every data file of a channel directory in time order.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, SinkError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let subdir = entry?.path();
        if !subdir.is_dir() {
            continue;
        }
        for file in fs::read_dir(&subdir)? {
            let p = file?.path();
            if let Some(n) = p.file_name().and_then(|s| s.to_str()) {
                if n.starts_with("rf@") && n.ends_with(".bin") {
                    out.push(p);
                }
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Decodes every block of one data file, verifying checksums where present.
pub fn read_blocks(path: &Path) -> Result<Vec<Block>, SinkError> {
    let data = fs::read(path)?;
    let corrupt = |reason: String| SinkError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let header = data
            .get(pos..pos + BLOCK_HEADER_LEN)
            .ok_or_else(|| corrupt(format!("truncated header at byte {}", pos)))?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != BLOCK_MAGIC {
            return Err(corrupt(format!("bad magic {:#x} at byte {}", magic, pos)));
        }
        let mut start = [0u8; 8];
        start.copy_from_slice(&header[4..12]);
        let start_index = u64::from_le_bytes(start);
        let field = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
        let count = field(12) as usize;
        let payload_len = field(16) as usize;
        let flags = field(20);
        let crc = field(24);

        let body_start = pos + BLOCK_HEADER_LEN;
        let payload = data
            .get(body_start..body_start + payload_len)
            .ok_or_else(|| corrupt(format!("truncated payload at byte {}", body_start)))?;
        if flags & FLAG_CHECKSUM != 0 {
            let actual = crc32fast::hash(payload);
            if actual != crc {
                return Err(corrupt(format!(
                    "payload CRC mismatch at index {}: expected {:#x}, got {:#x}",
                    start_index, crc, actual
                )));
            }
        }

        let raw_len = count * SampleFormat::Sc16.bytes_per_sample();
        let raw = if flags & FLAG_COMPRESSED != 0 {
            zstd::bulk::decompress(payload, raw_len)
                .map_err(|e| corrupt(format!("decompression failed: {}", e)))?
        } else {
            payload.to_vec()
        };
        if raw.len() != raw_len {
            return Err(corrupt(format!(
                "block at index {} holds {} bytes for {} samples",
                start_index,
                raw.len(),
                count
            )));
        }

        let samples = raw
            .chunks_exact(4)
            .map(|c| Complex::new(i16::from_le_bytes([c[0], c[1]]), i16::from_le_bytes([c[2], c[3]])))
            .collect();
        blocks.push(Block {
            start_index,
            flags,
            samples,
        });
        pos = body_start + payload_len;
    }
    Ok(blocks)
}

/// What one channel directory holds, as found by [`verify_channel`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    pub uuid: String,
    pub global_start_index: u64,
    pub files: usize,
    pub blocks: usize,
    pub compressed_blocks: usize,
    pub samples: u64,
    pub gap_samples: u64,
    /// One past the last stored sample.
    pub next_index: u64,
    pub checkpoint_index: Option<u64>,
}

/// Decodes every block of a channel directory. Blocks must be ordered and
/// start at or after the global start index, and a checkpoint may not claim
/// more data than the files hold. Holes between blocks are counted as gaps.
pub fn verify_channel(dir: &Path) -> Result<ChannelReport, SinkError> {
    let properties = read_properties(dir)?;
    let mut report = ChannelReport {
        uuid: properties.uuid,
        global_start_index: properties.global_start_index,
        files: 0,
        blocks: 0,
        compressed_blocks: 0,
        samples: 0,
        gap_samples: 0,
        next_index: properties.global_start_index,
        checkpoint_index: None,
    };

    for file in list_files(dir)? {
        report.files += 1;
        for block in read_blocks(&file)? {
            if block.start_index < report.next_index {
                return Err(SinkError::Corrupt {
                    path: file,
                    reason: format!(
                        "block at index {} overlaps data up to {}",
                        block.start_index, report.next_index
                    ),
                });
            }
            let len = block.samples.len() as u64;
            report.gap_samples += block.start_index - report.next_index;
            report.samples += len;
            report.blocks += 1;
            if block.flags & FLAG_COMPRESSED != 0 {
                report.compressed_blocks += 1;
            }
            report.next_index = block.start_index + len;
        }
    }

    if let Some(checkpoint) = read_checkpoint(dir)? {
        if checkpoint.next_index > report.next_index || checkpoint.samples_written > report.samples {
            return Err(SinkError::Corrupt {
                path: dir.join(CHECKPOINT_FILE),
                reason: format!(
                    "checkpoint records {} samples up to index {}, files hold {} up to {}",
                    checkpoint.samples_written, checkpoint.next_index, report.samples, report.next_index
                ),
            });
        }
        report.checkpoint_index = Some(checkpoint.next_index);
    }
    Ok(report)
}

/// `root` itself when it is a channel directory, otherwise its channel
/// subdirectories in name order.
pub fn channel_dirs(root: &Path) -> Result<Vec<PathBuf>, SinkError> {
    if root.join(PROPERTIES_FILE).is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.join(PROPERTIES_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // 2023-11-14T22:13:20Z
    const T0: u64 = 1_700_000_000;

    fn params(rate: SampleRate, start_index: u64) -> SinkParams {
        SinkParams {
            format: SampleFormat::Sc16,
            rate,
            start_index,
            uuid: "0123abcd".into(),
            layout: ArchiveLayout {
                subdir_cadence_secs: 3600,
                millis_per_file: 1000,
                compression_level: 0,
                checksum: false,
                num_subchannels: 1,
                continuous: true,
            },
        }
    }

    fn khz() -> SampleRate {
        SampleRate::new(1000, 1).unwrap()
    }

    fn ramp(len: usize, from: i16) -> Vec<Sample> {
        (0..len as i16).map(|i| Complex::new(from.wrapping_add(i), -i)).collect()
    }

    fn read_all(dir: &Path) -> Result<Vec<Block>, SinkError> {
        let mut out = Vec::new();
        for f in list_files(dir)? {
            out.extend(read_blocks(&f)?);
        }
        Ok(out)
    }

    #[test]
    fn test_write_split_on_file_boundary() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000 + 500;
        let mut writer = ArchiveWriter::create(dir.path(), &params(khz(), start))?;

        let samples = ramp(1000, 0);
        writer.write(start, &samples)?;
        writer.close()?;

        let files = list_files(dir.path())?;
        let subdir = dir.path().join("2023-11-14T22-00-00");
        assert_eq!(
            files,
            vec![subdir.join("rf@1700000000.000.bin"), subdir.join("rf@1700000001.000.bin")]
        );

        let first = read_blocks(&files[0])?;
        let second = read_blocks(&files[1])?;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].start_index, start);
        assert_eq!(first[0].samples, samples[..500].to_vec());
        assert_eq!(second[0].start_index, start + 500);
        assert_eq!(second[0].samples, samples[500..].to_vec());
        Ok(())
    }

    #[test]
    fn test_sub_second_file_names() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut p = params(khz(), 1500);
        p.layout.millis_per_file = 500;
        let mut writer = ArchiveWriter::create(dir.path(), &p)?;
        writer.write(1500, &ramp(10, 0))?;
        writer.close()?;

        let files = list_files(dir.path())?;
        assert_eq!(
            files,
            vec![dir.path().join("1970-01-01T00-00-00").join("rf@1.500.bin")]
        );
        Ok(())
    }

    #[test]
    fn test_rational_rate_boundaries() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        // 333.33... samples per second
        let rate = SampleRate::new(1000, 3)?;
        let mut writer = ArchiveWriter::create(dir.path(), &params(rate, 0))?;
        writer.write(0, &ramp(700, 0))?;
        writer.close()?;

        let blocks = read_all(dir.path())?;
        let layout: Vec<(u64, usize)> = blocks.iter().map(|b| (b.start_index, b.samples.len())).collect();
        assert_eq!(layout, vec![(0, 334), (334, 333), (667, 33)]);
        Ok(())
    }

    #[test]
    fn test_gap_leaves_hole_and_advances() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut writer = ArchiveWriter::create(dir.path(), &params(khz(), start))?;

        writer.write(start, &ramp(100, 0))?;
        writer.write(start + 300, &ramp(100, 100))?;
        assert_eq!(writer.next_index(), start + 400);
        writer.close()?;

        let starts: Vec<u64> = read_all(dir.path())?.iter().map(|b| b.start_index).collect();
        assert_eq!(starts, vec![start, start + 300]);
        let checkpoint = read_checkpoint(dir.path())?.unwrap();
        assert_eq!(checkpoint.next_index, start + 400);
        assert_eq!(checkpoint.samples_written, 200);
        Ok(())
    }

    #[test]
    fn test_out_of_order_write_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut writer = ArchiveWriter::create(dir.path(), &params(khz(), start))?;

        assert!(matches!(
            writer.write(start - 1, &ramp(1, 0)),
            Err(SinkError::OutOfOrder { expected, got }) if expected == start && got == start - 1
        ));
        writer.write(start, &ramp(100, 0))?;
        assert!(matches!(
            writer.write(start + 50, &ramp(10, 0)),
            Err(SinkError::OutOfOrder { .. })
        ));
        assert_eq!(writer.next_index(), start + 100);
        Ok(())
    }

    #[test]
    fn test_compressed_checksummed_blocks() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut p = params(khz(), start);
        p.layout.compression_level = 3;
        p.layout.checksum = true;
        let mut writer = ArchiveWriter::create(dir.path(), &p)?;

        let samples = vec![Complex::new(7, -7); 800];
        writer.write(start, &samples)?;
        writer.close()?;

        let files = list_files(dir.path())?;
        let blocks = read_blocks(&files[0])?;
        assert_eq!(blocks[0].flags, FLAG_COMPRESSED | FLAG_CHECKSUM);
        assert_eq!(blocks[0].samples, samples);
        assert!(fs::metadata(&files[0])?.len() < 800 * 4);
        Ok(())
    }

    #[test]
    fn test_corrupt_payload_detected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut p = params(khz(), start);
        p.layout.checksum = true;
        let mut writer = ArchiveWriter::create(dir.path(), &p)?;
        writer.write(start, &ramp(50, 0))?;
        writer.close()?;

        let file = list_files(dir.path())?.remove(0);
        let mut bytes = fs::read(&file)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&file, &bytes)?;

        assert!(matches!(read_blocks(&file), Err(SinkError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn test_properties_and_checkpoint() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut writer = ArchiveWriter::create(dir.path(), &params(khz(), start))?;

        let props = read_properties(dir.path())?;
        assert_eq!(props.global_start_index, start);
        assert_eq!(props.uuid, "0123abcd");
        assert_eq!(props.sample_rate_numerator, 1000);
        assert_eq!(props.layout.millis_per_file, 1000);
        assert_eq!(read_checkpoint(dir.path())?, None);

        // rotation into the second file checkpoints the first
        writer.write(start, &ramp(1200, 0))?;
        let checkpoint = read_checkpoint(dir.path())?.unwrap();
        assert_eq!(
            checkpoint.file.as_deref().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
            Some("rf@1700000000.000.bin")
        );
        assert_eq!(checkpoint.next_index, start + 1000);

        writer.close()?;
        assert!(matches!(writer.write(start + 1200, &ramp(1, 0)), Err(SinkError::Closed)));
        assert_eq!(read_checkpoint(dir.path())?.unwrap().next_index, start + 1200);
        assert!(!dir.path().join(".checkpoint.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_factory_creates_writer() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut sink = ArchiveFactory.create(dir.path(), &params(khz(), start))?;
        sink.write(start, &ramp(10, 0))?;
        sink.close()?;
        assert_eq!(read_all(dir.path())?[0].samples.len(), 10);
        Ok(())
    }

    #[test]
    fn test_verify_counts_gaps_and_blocks() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut p = params(khz(), start);
        p.layout.compression_level = 1;
        let mut writer = ArchiveWriter::create(dir.path(), &p)?;
        writer.write(start, &ramp(100, 0))?;
        writer.write(start + 300, &ramp(800, 0))?;
        writer.close()?;

        let report = verify_channel(dir.path())?;
        assert_eq!(report.uuid, "0123abcd");
        assert_eq!(report.global_start_index, start);
        assert_eq!(report.files, 2);
        assert_eq!(report.blocks, 3);
        assert_eq!(report.compressed_blocks, 3);
        assert_eq!(report.samples, 900);
        assert_eq!(report.gap_samples, 200);
        assert_eq!(report.next_index, start + 1100);
        assert_eq!(report.checkpoint_index, Some(start + 1100));
        Ok(())
    }

    #[test]
    fn test_verify_rejects_checkpoint_past_data() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let start = T0 * 1000;
        let mut writer = ArchiveWriter::create(dir.path(), &params(khz(), start))?;
        writer.write(start, &ramp(100, 0))?;
        writer.close()?;

        let checkpoint = Checkpoint {
            next_index: start + 500,
            samples_written: 500,
            file: None,
            updated_unix_ms: 0,
        };
        write_atomic(dir.path(), CHECKPOINT_FILE, &serde_json::to_vec(&checkpoint)?)?;
        assert!(matches!(verify_channel(dir.path()), Err(SinkError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn test_channel_dirs() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        assert!(channel_dirs(dir.path())?.is_empty());

        for label in ["chb", "cha"] {
            ArchiveWriter::create(&dir.path().join(label), &params(khz(), 0))?.close()?;
        }
        fs::create_dir(dir.path().join("scratch"))?;
        assert_eq!(
            channel_dirs(dir.path())?,
            vec![dir.path().join("cha"), dir.path().join("chb")]
        );
        assert_eq!(channel_dirs(&dir.path().join("cha"))?, vec![dir.path().join("cha")]);
        Ok(())
    }
}
