use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use crate::error::FileError;

/// Rate at which recorded channels are sampled, in Hz.
pub const AUTOMATION_RATE: f64 = 1_000.0;
const RING_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationSample {
    pub value: f32,
    /// Seconds since the start of the performance.
    pub time: f64,
}

/// Audio-thread end of an automation track.
///
/// Decimates the channel output to [`AUTOMATION_RATE`] and pushes into a ring.
/// A full ring drops the sample and counts it.
pub struct RecordTap {
    producer: HeapProducer<AutomationSample>,
    sample_rate: f64,
    frames_per_point: f64,
    next_point: f64,
    elapsed_frames: u64,
    limit_frames: u64,
    dropped: Arc<AtomicU64>,
}

impl RecordTap {
    #[inline]
    pub fn push_block(&mut self, values: &[f32]) {
        for (offset, value) in values.iter().enumerate() {
            let frame = self.elapsed_frames + offset as u64;
            if frame >= self.limit_frames {
                break;
            }
            if (frame as f64) < self.next_point {
                continue;
            }
            self.next_point += self.frames_per_point;
            let sample = AutomationSample {
                value: *value,
                time: frame as f64 / self.sample_rate,
            };
            if self.producer.push(sample).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.elapsed_frames += values.len() as u64;
    }

    /// Starts a new performance pass.
    pub fn rewind(&mut self) {
        self.elapsed_frames = 0;
        self.next_point = 0.0;
    }
}

/// Control-thread end of an automation track: drains the ring into a text
/// file with one `value time` pair per line.
///
/// Write failures are logged once and disable the track; playback never
/// notices.
pub struct AutomationWriter {
    name: String,
    path: PathBuf,
    consumer: HeapConsumer<AutomationSample>,
    writer: Option<BufWriter<File>>,
    failed: bool,
    written: u64,
    dropped: Arc<AtomicU64>,
}

impl AutomationWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Truncates the track for a new performance and discards stale samples.
    pub fn begin(&mut self) {
        self.writer = None;
        self.failed = false;
        self.written = 0;
        self.dropped.store(0, Ordering::Relaxed);
        while self.consumer.pop().is_some() {}
        if let Err(err) = self.open() {
            self.fail(&err);
        }
    }

    fn open(&mut self) -> Result<(), FileError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| FileError::io(parent, err))?;
            }
        }
        let file = File::create(&self.path).map_err(|err| FileError::io(&self.path, err))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn fail(&mut self, err: &FileError) {
        tracing::warn!(track = %self.name, %err, "automation track disabled");
        self.failed = true;
        self.writer = None;
    }

    /// Moves everything currently in the ring to the file.
    pub fn drain(&mut self) -> usize {
        if self.failed {
            while self.consumer.pop().is_some() {}
            return 0;
        }
        if self.writer.is_none() {
            if let Err(err) = self.open() {
                self.fail(&err);
                return 0;
            }
        }
        let mut count = 0;
        while let Some(sample) = self.consumer.pop() {
            let Some(writer) = self.writer.as_mut() else {
                break;
            };
            if let Err(err) = writeln!(writer, "{:.6} {:.6}", sample.value, sample.time) {
                let err = FileError::io(&self.path, err);
                self.fail(&err);
                return count;
            }
            count += 1;
        }
        self.written += count as u64;
        count
    }

    /// Drains and flushes to disk.
    pub fn flush(&mut self) {
        self.drain();
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::warn!(track = %self.name, dropped, "automation samples dropped under load");
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                let err = FileError::io(&self.path, err);
                self.fail(&err);
            }
        }
    }
}

/// Creates the two ends of an automation track recording for `duration`
/// seconds per performance.
pub fn automation_track(
    name: impl Into<String>,
    path: impl Into<PathBuf>,
    sample_rate: f32,
    duration: f64,
) -> (RecordTap, AutomationWriter) {
    let (producer, consumer) = HeapRb::<AutomationSample>::new(RING_CAPACITY).split();
    let dropped = Arc::new(AtomicU64::new(0));
    let sample_rate = sample_rate.max(1.0) as f64;
    let tap = RecordTap {
        producer,
        sample_rate,
        frames_per_point: sample_rate / AUTOMATION_RATE,
        next_point: 0.0,
        elapsed_frames: 0,
        limit_frames: (duration.max(0.0) * sample_rate).round() as u64,
        dropped: Arc::clone(&dropped),
    };
    let writer = AutomationWriter {
        name: name.into(),
        path: path.into(),
        consumer,
        writer: None,
        failed: false,
        written: 0,
        dropped,
    };
    (tap, writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_at_one_kilohertz_for_the_timeline_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp.auto");
        let (mut tap, mut writer) = automation_track("amp", &path, 48_000.0, 0.5);
        writer.begin();
        let block = vec![0.25f32; 480];
        for _ in 0..100 {
            tap.push_block(&block);
            writer.drain();
        }
        writer.flush();
        assert_eq!(writer.written(), 500);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 500);
        assert_eq!(lines[0], "0.250000 0.000000");
        assert_eq!(lines[1], "0.250000 0.001000");
    }

    #[test]
    fn overflow_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tap, mut writer) = automation_track("x", dir.path().join("x.auto"), 1_000.0, 100.0);
        tap.push_block(&vec![1.0; RING_CAPACITY + 10]);
        assert_eq!(writer.dropped(), 10);
        writer.flush();
        assert_eq!(writer.written(), RING_CAPACITY as u64);
    }

    #[test]
    fn unwritable_path_disables_the_track() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let (mut tap, mut writer) = automation_track("y", blocker.join("y.auto"), 1_000.0, 1.0);
        writer.begin();
        tap.push_block(&[0.5; 16]);
        assert_eq!(writer.drain(), 0);
        writer.flush();
    }
}
