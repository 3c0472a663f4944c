//! Edge-triggered incident recording with a linger window.
//!
//! The manager is a two-state machine (`Idle`, `Recording`) fed once per capture cycle
//! with the actuator signal and the display frame:
//!
//! - `Idle` + `Both` opens a new timestamp-named file and writes the frame.
//! - `Recording` + `Both` clears any linger deadline and writes the frame.
//! - `Recording` + anything else arms the deadline (`now + linger`) if unset and keeps
//!   writing until the deadline passes, at which point the file is closed.
//! - A cycle without a frame ([`RecordingManager::tick`]) counts as non-danger.
//!
//! Frames go to `<name>.<ext>.part`; closing the session renames the file to its final
//! name, so only complete recordings are ever listed.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::writer::{FrameWriter, VideoWriterFactory};
use crate::config::RecordingConfig;
use crate::detection::ActuatorSignal;
use crate::hardware::Frame;

/// Suffix carried by files that are still being written.
pub const PART_SUFFIX: &str = "part";

/// Timestamp format used for recording file stems.
pub const FILE_STEM_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// What one observation did to the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// No session before or after
    Idle,
    /// A new session was opened
    Started { path: PathBuf },
    /// The session is still open
    Recording,
    /// The linger window elapsed and the file was published
    Finished { path: PathBuf, frames: u64 },
    /// Opening or writing failed; any partial file was published
    Failed { path: PathBuf },
}

/// One open recording.
pub struct RecordingSession {
    part_path: PathBuf,
    final_path: PathBuf,
    started_at: Instant,
    linger_deadline: Option<Instant>,
    writer: Box<dyn FrameWriter>,
    frames_written: u64,
}

impl RecordingSession {
    /// Final path of the recording once published
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    /// When the session was opened
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Deadline after which the session closes, if danger has cleared
    pub fn linger_deadline(&self) -> Option<Instant> {
        self.linger_deadline
    }

    /// Frames appended so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

/// Drives at most one [`RecordingSession`] at a time.
pub struct RecordingManager {
    save_dir: PathBuf,
    extension: String,
    linger: Duration,
    fps: u32,
    factory: Arc<dyn VideoWriterFactory>,
    session: Option<RecordingSession>,
}

impl RecordingManager {
    /// Create a manager writing into `config.save_dir`
    pub fn new(config: &RecordingConfig, factory: Arc<dyn VideoWriterFactory>) -> Self {
        Self {
            save_dir: config.save_dir.clone(),
            extension: config.extension.clone(),
            linger: config.linger(),
            fps: config.fps,
            factory,
            session: None,
        }
    }

    /// Whether a session is open
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// The open session, if any
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Feed one cycle's signal and frame.
    pub fn observe(&mut self, signal: ActuatorSignal, frame: &Frame, now: Instant) -> RecorderEvent {
        let danger = signal.is_danger();
        if self.session.is_none() {
            return if danger { self.start(frame, now) } else { RecorderEvent::Idle };
        }

        if danger {
            if let Some(session) = self.session.as_mut() {
                session.linger_deadline = None;
            }
        } else if let Some(event) = self.close_if_lingered(now) {
            return event;
        }

        let Some(session) = self.session.as_mut() else {
            return RecorderEvent::Idle;
        };
        match session.writer.write_frame(frame) {
            Ok(()) => {
                session.frames_written += 1;
                RecorderEvent::Recording
            }
            Err(e) => {
                error!(path = %session.part_path.display(), error = %e, "Recording write failed, stopping session");
                let path = session.final_path.clone();
                self.finalize();
                RecorderEvent::Failed { path }
            }
        }
    }

    /// Advance the linger window for a cycle that produced no frame.
    ///
    /// A missing frame carries no danger, so it arms the deadline the same way a
    /// non-danger frame does.
    pub fn tick(&mut self, now: Instant) -> RecorderEvent {
        if self.session.is_none() {
            return RecorderEvent::Idle;
        }
        self.close_if_lingered(now).unwrap_or(RecorderEvent::Recording)
    }

    fn close_if_lingered(&mut self, now: Instant) -> Option<RecorderEvent> {
        let session = self.session.as_mut()?;
        let deadline = *session.linger_deadline.get_or_insert(now + self.linger);
        if now < deadline {
            return None;
        }
        let frames = session.frames_written;
        Some(match self.finalize() {
            Some(path) => RecorderEvent::Finished { path, frames },
            None => RecorderEvent::Idle,
        })
    }

    /// Close the active session, if any, and publish its file.
    ///
    /// Returns the final path of the published file.
    pub fn finalize(&mut self) -> Option<PathBuf> {
        let session = self.session.take()?;
        let RecordingSession {
            part_path,
            final_path,
            started_at,
            writer,
            frames_written,
            ..
        } = session;

        if let Err(e) = writer.finish() {
            warn!(path = %part_path.display(), error = %e, "Failed to flush recording");
        }

        match std::fs::rename(&part_path, &final_path) {
            Ok(()) => {
                info!(
                    path = %final_path.display(),
                    frames = frames_written,
                    duration_ms = started_at.elapsed().as_millis() as u64,
                    "Recording finished"
                );
                Some(final_path)
            }
            Err(e) => {
                error!(path = %part_path.display(), error = %e, "Failed to publish recording");
                None
            }
        }
    }

    fn start(&mut self, frame: &Frame, now: Instant) -> RecorderEvent {
        let stem = Local::now().format(FILE_STEM_FORMAT).to_string();
        let final_path = next_available_path(&self.save_dir, &stem, &self.extension);
        let part_path = part_path_for(&final_path);

        if let Err(e) = std::fs::create_dir_all(&self.save_dir) {
            error!(dir = %self.save_dir.display(), error = %e, "Cannot create recording directory");
            return RecorderEvent::Failed { path: final_path };
        }

        let mut writer = match self
            .factory
            .create(&part_path, self.fps, frame.width, frame.height)
        {
            Ok(writer) => writer,
            Err(e) => {
                error!(path = %part_path.display(), error = %e, "Cannot open recording");
                let _ = std::fs::remove_file(&part_path);
                return RecorderEvent::Failed { path: final_path };
            }
        };

        info!(path = %final_path.display(), "Danger detected, recording started");

        if let Err(e) = writer.write_frame(frame) {
            error!(path = %part_path.display(), error = %e, "Recording write failed, stopping session");
            self.session = Some(RecordingSession {
                part_path,
                final_path: final_path.clone(),
                started_at: now,
                linger_deadline: None,
                writer,
                frames_written: 0,
            });
            self.finalize();
            return RecorderEvent::Failed { path: final_path };
        }

        self.session = Some(RecordingSession {
            part_path,
            final_path: final_path.clone(),
            started_at: now,
            linger_deadline: None,
            writer,
            frames_written: 1,
        });
        RecorderEvent::Started { path: final_path }
    }
}

impl Drop for RecordingManager {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// `<dir>/<stem>.<ext>`, or `<dir>/<stem>_N.<ext>` with the smallest free `N`.
///
/// A name is taken if either the final file or its `.part` twin exists.
pub fn next_available_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let taken = |path: &Path| path.exists() || part_path_for(path).exists();

    let candidate = dir.join(format!("{}.{}", stem, extension));
    if !taken(&candidate) {
        return candidate;
    }
    let mut n: u32 = 1;
    loop {
        let candidate = dir.join(format!("{}_{}.{}", stem, n, extension));
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::writer::RawVideoWriterFactory;
    use anyhow::Result;

    fn manager(dir: &Path) -> RecordingManager {
        let config = RecordingConfig {
            save_dir: dir.to_path_buf(),
            ..RecordingConfig::default()
        };
        RecordingManager::new(&config, Arc::new(RawVideoWriterFactory))
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn no_danger_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = manager(dir.path());
        let frame = Frame::filled(8, 8, 3, 0);
        let t0 = Instant::now();
        for (i, signal) in [ActuatorSignal::None, ActuatorSignal::Forklift, ActuatorSignal::Person]
            .into_iter()
            .enumerate()
        {
            let event = rec.observe(signal, &frame, t0 + Duration::from_millis(i as u64 * 100));
            assert_eq!(event, RecorderEvent::Idle);
        }
        drop(rec);
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn five_danger_cycles_then_linger_yield_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = manager(dir.path());
        let frame = Frame::filled(8, 8, 3, 0);
        let t0 = Instant::now();
        let cycle = Duration::from_millis(100);

        assert!(matches!(
            rec.observe(ActuatorSignal::Both, &frame, t0),
            RecorderEvent::Started { .. }
        ));
        for i in 1..5 {
            assert_eq!(rec.observe(ActuatorSignal::Both, &frame, t0 + cycle * i), RecorderEvent::Recording);
        }

        // danger clears at cycle 6; linger starts there
        let t6 = t0 + cycle * 5;
        assert_eq!(rec.observe(ActuatorSignal::Person, &frame, t6), RecorderEvent::Recording);
        assert_eq!(rec.session().and_then(|s| s.linger_deadline()), Some(t6 + Duration::from_secs(10)));

        // still open just before the deadline; only the .part file exists
        assert_eq!(
            rec.observe(ActuatorSignal::None, &frame, t6 + Duration::from_millis(9_900)),
            RecorderEvent::Recording
        );
        let during = files(dir.path());
        assert_eq!(during.len(), 1);
        assert!(during[0].ends_with(".mp4.part"));

        match rec.observe(ActuatorSignal::None, &frame, t6 + Duration::from_secs(10)) {
            RecorderEvent::Finished { frames, .. } => assert_eq!(frames, 7),
            other => panic!("expected Finished, got {:?}", other),
        }
        assert!(!rec.is_recording());
        assert_eq!(rec.observe(ActuatorSignal::None, &frame, t6 + Duration::from_secs(11)), RecorderEvent::Idle);

        let after = files(dir.path());
        assert_eq!(after.len(), 1);
        assert!(after[0].ends_with(".mp4"));
    }

    #[test]
    fn danger_during_linger_extends_same_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = manager(dir.path());
        let frame = Frame::filled(8, 8, 3, 0);
        let t0 = Instant::now();

        rec.observe(ActuatorSignal::Both, &frame, t0);
        rec.observe(ActuatorSignal::None, &frame, t0 + Duration::from_secs(1));
        rec.observe(ActuatorSignal::Both, &frame, t0 + Duration::from_secs(9));
        assert_eq!(rec.session().and_then(|s| s.linger_deadline()), None);

        // the old deadline (t0 + 11s) no longer applies
        assert_eq!(
            rec.observe(ActuatorSignal::None, &frame, t0 + Duration::from_secs(12)),
            RecorderEvent::Recording
        );
        assert!(matches!(
            rec.observe(ActuatorSignal::None, &frame, t0 + Duration::from_secs(22)),
            RecorderEvent::Finished { .. }
        ));
        assert_eq!(files(dir.path()).len(), 1);
    }

    #[test]
    fn tick_closes_session_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = manager(dir.path());
        let t0 = Instant::now();

        assert_eq!(rec.tick(t0), RecorderEvent::Idle);
        rec.observe(ActuatorSignal::Both, &Frame::filled(8, 8, 3, 0), t0);

        assert_eq!(rec.tick(t0 + Duration::from_secs(1)), RecorderEvent::Recording);
        assert_eq!(
            rec.session().and_then(|s| s.linger_deadline()),
            Some(t0 + Duration::from_secs(11))
        );
        assert_eq!(rec.tick(t0 + Duration::from_secs(10)), RecorderEvent::Recording);
        assert!(matches!(
            rec.tick(t0 + Duration::from_secs(11)),
            RecorderEvent::Finished { frames: 1, .. }
        ));

        let names = files(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".mp4"));
    }

    #[test]
    fn drop_publishes_active_session() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut rec = manager(dir.path());
            rec.observe(ActuatorSignal::Both, &Frame::filled(8, 8, 3, 0), Instant::now());
        }
        let names = files(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".mp4"));
    }

    struct FailingWriter;

    impl FrameWriter for FailingWriter {
        fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
            anyhow::bail!("disk full")
        }

        fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct FailAfterFirst;

    impl VideoWriterFactory for FailAfterFirst {
        fn create(&self, path: &Path, _fps: u32, _w: u32, _h: u32) -> Result<Box<dyn FrameWriter>> {
            std::fs::write(path, b"partial")?;
            Ok(Box::new(FailingWriter))
        }
    }

    #[test]
    fn write_failure_forces_idle_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecordingConfig {
            save_dir: dir.path().to_path_buf(),
            ..RecordingConfig::default()
        };
        let mut rec = RecordingManager::new(&config, Arc::new(FailAfterFirst));

        let event = rec.observe(ActuatorSignal::Both, &Frame::filled(8, 8, 3, 0), Instant::now());
        assert!(matches!(event, RecorderEvent::Failed { .. }));
        assert!(!rec.is_recording());

        let names = files(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".mp4"));
    }

    #[test]
    fn collision_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let stem = "2024_01_01_12_00_00";
        assert_eq!(
            next_available_path(dir.path(), stem, "mp4"),
            dir.path().join("2024_01_01_12_00_00.mp4")
        );

        std::fs::write(dir.path().join("2024_01_01_12_00_00.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("2024_01_01_12_00_00_1.mp4.part"), b"x").unwrap();
        assert_eq!(
            next_available_path(dir.path(), stem, "mp4"),
            dir.path().join("2024_01_01_12_00_00_2.mp4")
        );
    }
}
