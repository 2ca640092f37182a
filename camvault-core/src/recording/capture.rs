//! Capture process management.
//!
//! ffmpeg copies the RTSP stream into fixed-duration local segments.
//! Segments are written under a `.part` suffix and renamed to their
//! final name only once ffmpeg has moved on to the next file, so a
//! finalized segment is always complete and playable. The supervisor
//! consumes the resulting [`CaptureEvent`] stream.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecordingConfig;
use crate::error::{Error, Result};
use crate::models::DeviceId;

const PART_SUFFIX: &str = ".part";
const SEGMENT_PATTERN: &str = "%Y-%m-%d_%H-%M-%S.mp4.part";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const STDERR_TAIL: usize = 500;

/// A closed, renamed, playable segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedSegment {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum CaptureEvent {
    /// The process is producing output (first segment file observed)
    Producing,
    Finalized(FinalizedSegment),
    /// The process is gone. `error` is `None` for a requested stop.
    Exited { error: Option<String> },
}

/// Handle to one running capture process.
pub struct CaptureHandle {
    events: mpsc::Receiver<CaptureEvent>,
    stop: CancellationToken,
}

impl CaptureHandle {
    #[must_use]
    pub fn new(events: mpsc::Receiver<CaptureEvent>, stop: CancellationToken) -> Self {
        Self { events, stop }
    }

    /// Next lifecycle event; `None` once the watcher task is gone.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }

    /// Ask the process to stop cleanly. Events keep flowing until
    /// [`CaptureEvent::Exited`] arrives.
    pub fn begin_stop(&self) {
        self.stop.cancel();
    }
}

#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    async fn launch(
        &self,
        device_id: &DeviceId,
        stream_url: &str,
        segment_seconds: u64,
    ) -> Result<CaptureHandle>;
}

/// Launches ffmpeg in continuous-segmenting mode.
pub struct FfmpegLauncher {
    config: RecordingConfig,
}

impl FfmpegLauncher {
    #[must_use]
    pub fn new(config: RecordingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CaptureLauncher for FfmpegLauncher {
    async fn launch(
        &self,
        device_id: &DeviceId,
        stream_url: &str,
        segment_seconds: u64,
    ) -> Result<CaptureHandle> {
        let output_dir = Path::new(&self.config.local_path).join(device_id.to_string());
        tokio::fs::create_dir_all(&output_dir).await?;
        let pattern = output_dir.join(SEGMENT_PATTERN);

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .args(["-loglevel", "warning"])
            .args(["-rtsp_transport", "tcp"])
            .args(["-i", stream_url])
            // Drop audio: pcm_alaw from these cameras does not mux into mp4
            .arg("-an")
            .args(["-c:v", "copy"])
            .args(["-f", "segment"])
            .args(["-segment_time", &segment_seconds.to_string()])
            .args(["-strftime", "1"])
            .args(["-reset_timestamps", "1"])
            .arg(&pattern)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("failed to spawn ffmpeg: {e}")))?;

        info!(device = %device_id, segment_seconds, "capture process started");

        let (tx, rx) = mpsc::channel(32);
        let stop = CancellationToken::new();
        let watcher = Watcher {
            device_id: device_id.clone(),
            output_dir,
            events: tx,
            stop: stop.clone(),
            grace: Duration::from_secs(self.config.stop_grace_seconds),
        };
        tokio::spawn(watcher.run(child));

        Ok(CaptureHandle::new(rx, stop))
    }
}

struct Watcher {
    device_id: DeviceId,
    output_dir: PathBuf,
    events: mpsc::Sender<CaptureEvent>,
    stop: CancellationToken,
    grace: Duration,
}

impl Watcher {
    async fn run(self, mut child: tokio::process::Child) {
        let stderr_tail = spawn_stderr_tail(&mut child);
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut producing = false;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if !producing && has_part_file(&self.output_dir) {
                        producing = true;
                        let _ = self.events.send(CaptureEvent::Producing).await;
                    }
                    self.emit_finalized(false).await;
                }
                status = child.wait() => {
                    // Unrequested exit: the trailing part may be truncated
                    // mid-write, so it is discarded rather than queued.
                    discard_trailing_part(&self.output_dir);
                    let tail = stderr_tail
                        .await
                        .ok()
                        .and_then(|r| r.ok())
                        .unwrap_or_default();
                    let error = match status {
                        Ok(s) if tail.is_empty() => Some(format!("exit {s}")),
                        Ok(s) => Some(format!("exit {s}: {tail}")),
                        Err(e) => Some(e.to_string()),
                    };
                    warn!(device = %self.device_id, ?error, "capture process exited");
                    let _ = self.events.send(CaptureEvent::Exited { error }).await;
                    return;
                }
                _ = self.stop.cancelled() => {
                    self.stop_gracefully(child).await;
                    return;
                }
            }
        }
    }

    /// Ask ffmpeg to quit ('q' on stdin closes the current segment
    /// properly), then finalize whatever it closed. Past the grace
    /// period the process is killed and the partial file discarded.
    async fn stop_gracefully(&self, mut child: tokio::process::Child) {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => {
                self.emit_finalized(true).await;
                debug!(device = %self.device_id, "capture process stopped cleanly");
            }
            Err(_) => {
                let _ = child.start_kill();
                discard_trailing_part(&self.output_dir);
                warn!(device = %self.device_id, "capture process killed after stop grace");
            }
        }
        let _ = self.events.send(CaptureEvent::Exited { error: None }).await;
    }

    async fn emit_finalized(&self, include_newest: bool) {
        match sweep_closed_segments(&self.output_dir, Utc::now(), include_newest) {
            Ok(finalized) => {
                for segment in finalized {
                    debug!(device = %self.device_id, path = %segment.path.display(), "segment finalized");
                    let _ = self.events.send(CaptureEvent::Finalized(segment)).await;
                }
            }
            Err(e) => warn!(device = %self.device_id, error = %e, "segment sweep failed"),
        }
    }
}

fn spawn_stderr_tail(
    child: &mut tokio::process::Child,
) -> tokio::task::JoinHandle<std::io::Result<String>> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_string(&mut buf).await?;
        }
        let tail = buf.trim();
        let start = tail.len().saturating_sub(STDERR_TAIL);
        Ok(tail
            .char_indices()
            .find(|(i, _)| *i >= start)
            .map(|(i, _)| tail[i..].to_string())
            .unwrap_or_default())
    })
}

fn has_part_file(dir: &Path) -> bool {
    list_parts(dir).map(|parts| !parts.is_empty()).unwrap_or(false)
}

/// Rename closed `.part` files to their final names, oldest first.
///
/// The newest part is the file ffmpeg is still writing; it is skipped
/// unless `include_newest` is set (clean shutdown, where ffmpeg has
/// closed it). Each segment's end time is the next segment's start;
/// the last one finalized gets `now`.
fn sweep_closed_segments(
    dir: &Path,
    now: DateTime<Utc>,
    include_newest: bool,
) -> std::io::Result<Vec<FinalizedSegment>> {
    let parts = list_parts(dir)?;
    let closed = if include_newest {
        parts.as_slice()
    } else if parts.len() > 1 {
        &parts[..parts.len() - 1]
    } else {
        &[]
    };

    let mut finalized = Vec::with_capacity(closed.len());
    for (i, (path, started_at)) in closed.iter().enumerate() {
        let ended_at = parts
            .get(i + 1)
            .map(|(_, next_start)| *next_start)
            .unwrap_or(now);
        let final_path = strip_part_suffix(path);
        std::fs::rename(path, &final_path)?;
        finalized.push(FinalizedSegment {
            path: final_path,
            started_at: *started_at,
            ended_at,
        });
    }
    Ok(finalized)
}

/// Remove the newest `.part` file, if any. Used after a crash or kill,
/// where the file may be truncated mid-write.
fn discard_trailing_part(dir: &Path) {
    if let Ok(parts) = list_parts(dir) {
        if let Some((path, _)) = parts.last() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to discard partial segment");
            }
        }
    }
}

/// `.part` files in the directory, sorted by the start time encoded in
/// the filename. Files that don't match the pattern are ignored.
fn list_parts(dir: &Path) -> std::io::Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let mut parts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(started_at) = parse_segment_start(&path) {
            parts.push((path, started_at));
        }
    }
    parts.sort_by_key(|(_, t)| *t);
    Ok(parts)
}

fn strip_part_suffix(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_suffix(PART_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}

/// Start time from a `YYYY-MM-DD_HH-MM-SS.mp4.part` filename.
pub(crate) fn parse_segment_start(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(PART_SUFFIX)?.strip_suffix(".mp4")?;
    let naive = NaiveDateTime::parse_from_str(stem, "%Y-%m-%d_%H-%M-%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 27, 15, 0, 0).unwrap()
    }

    #[test]
    fn test_sweep_skips_the_newest_part() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2026-02-27_14-00-00.mp4.part");
        touch(dir.path(), "2026-02-27_14-05-00.mp4.part");
        touch(dir.path(), "2026-02-27_14-10-00.mp4.part");

        let finalized = sweep_closed_segments(dir.path(), now(), false).unwrap();
        assert_eq!(finalized.len(), 2);
        assert!(dir.path().join("2026-02-27_14-00-00.mp4").exists());
        assert!(dir.path().join("2026-02-27_14-05-00.mp4").exists());
        // In-progress file untouched
        assert!(dir.path().join("2026-02-27_14-10-00.mp4.part").exists());

        // End time comes from the next segment's start
        assert_eq!(
            finalized[0].ended_at,
            Utc.with_ymd_and_hms(2026, 2, 27, 14, 5, 0).unwrap()
        );
        assert_eq!(
            finalized[1].ended_at,
            Utc.with_ymd_and_hms(2026, 2, 27, 14, 10, 0).unwrap()
        );
    }

    #[test]
    fn test_sweep_with_single_part_finalizes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2026-02-27_14-00-00.mp4.part");
        let finalized = sweep_closed_segments(dir.path(), now(), false).unwrap();
        assert!(finalized.is_empty());
        assert!(dir.path().join("2026-02-27_14-00-00.mp4.part").exists());
    }

    #[test]
    fn test_clean_stop_finalizes_all_parts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2026-02-27_14-00-00.mp4.part");
        touch(dir.path(), "2026-02-27_14-05-00.mp4.part");

        let finalized = sweep_closed_segments(dir.path(), now(), true).unwrap();
        assert_eq!(finalized.len(), 2);
        // Last segment's end time falls back to now
        assert_eq!(finalized[1].ended_at, now());
        assert!(list_parts(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_discard_trailing_part_removes_only_newest() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2026-02-27_14-00-00.mp4.part");
        touch(dir.path(), "2026-02-27_14-05-00.mp4.part");

        discard_trailing_part(dir.path());
        assert!(dir.path().join("2026-02-27_14-00-00.mp4.part").exists());
        assert!(!dir.path().join("2026-02-27_14-05-00.mp4.part").exists());
    }

    #[test]
    fn test_sweep_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "2026-02-27_14-00-00.mp4"); // already finalized
        let finalized = sweep_closed_segments(dir.path(), now(), true).unwrap();
        assert!(finalized.is_empty());
    }

    #[tokio::test]
    async fn test_stderr_tail_captures_trailing_output() {
        let mut child = Command::new("sh")
            .args(["-c", "echo boom >&2"])
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let tail = spawn_stderr_tail(&mut child);
        child.wait().await.unwrap();
        assert_eq!(tail.await.unwrap().unwrap(), "boom");
    }

    #[tokio::test]
    async fn test_stderr_tail_is_bounded() {
        let mut child = Command::new("sh")
            .args(["-c", "for i in $(seq 600); do printf x; done >&2"])
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let tail = spawn_stderr_tail(&mut child);
        child.wait().await.unwrap();
        assert_eq!(tail.await.unwrap().unwrap().len(), STDERR_TAIL);
    }

    #[test]
    fn test_parse_segment_start() {
        let t = parse_segment_start(Path::new("/x/2026-02-27_14-05-30.mp4.part")).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 2, 27, 14, 5, 30).unwrap());
        assert!(parse_segment_start(Path::new("/x/garbage.mp4.part")).is_none());
        assert!(parse_segment_start(Path::new("/x/2026-02-27_14-05-30.mp4")).is_none());
    }
}
