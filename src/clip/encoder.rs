//! Clip encoding.
//!
//! Frames are dumped into a raw RGB24 video file, then an external encoder
//! process re-encodes that file into a broadly playable H.264 MP4. The
//! subprocess is bounded by a timeout and its result is reported as a value;
//! a hung or crashed encoder is a failed clip, never a stuck pipeline.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL_BYTES: usize = 2048;
const SPAWN_ATTEMPTS: u32 = 20;

/// How an encoding attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// The raw intermediate file could not be written.
    RawWriteFailed,
    /// The encoder program could not be started.
    SpawnFailed,
    /// The encoder exited non-zero.
    Failed,
    /// The encoder ran past its timeout and was killed.
    TimedOut,
    /// The encoder exited zero but left no (or an empty) output file.
    MissingOutput,
}

/// Result of one encoder run.
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub output_path: PathBuf,
    /// Last bytes of the encoder's stderr, or the local error message.
    pub detail: String,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    fn new(status: CommandStatus, output_path: &Path, detail: impl Into<String>) -> Self {
        Self {
            status,
            exit_code: None,
            output_path: output_path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// Turns a sequence of frames into a playable clip at `output_path`.
pub trait ClipEncoder: Send {
    /// `raw_path` is a scratch location the encoder may use and must remove.
    fn encode(
        &self,
        frames: &[&Frame],
        fps: f64,
        raw_path: &Path,
        output_path: &Path,
    ) -> CommandOutcome;
}

/// Encoder that shells out to `ffmpeg`.
#[derive(Clone, Debug)]
pub struct FfmpegEncoder {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn args(
        &self,
        width: u32,
        height: u32,
        fps: f64,
        raw_path: &Path,
        output_path: &Path,
    ) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-video_size".into(),
            format!("{}x{}", width, height),
            "-framerate".into(),
            format!("{}", fps),
            "-i".into(),
            raw_path.to_string_lossy().into_owned(),
            "-vcodec".into(),
            "libx264".into(),
            "-profile:v".into(),
            "baseline".into(),
            "-level".into(),
            "3.0".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
            output_path.to_string_lossy().into_owned(),
        ]
    }

    /// Start the encoder. A program whose file is still open for writing
    /// somewhere (ETXTBSY) is retried briefly before giving up.
    fn spawn(&self, args: &[String]) -> std::io::Result<Child> {
        let mut attempt = 1;
        loop {
            let spawned = Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn();
            match spawned {
                Err(e)
                    if e.kind() == std::io::ErrorKind::ExecutableFileBusy
                        && attempt < SPAWN_ATTEMPTS =>
                {
                    log::debug!("{} busy, retrying spawn: {}", self.program.display(), e);
                    attempt += 1;
                    std::thread::sleep(POLL_INTERVAL);
                }
                other => return other,
            }
        }
    }

    fn run(&self, args: &[String], output_path: &Path) -> CommandOutcome {
        let mut child = match self.spawn(args) {
            Ok(child) => child,
            Err(e) => {
                return CommandOutcome::new(
                    CommandStatus::SpawnFailed,
                    output_path,
                    format!("failed to start {}: {}", self.program.display(), e),
                )
            }
        };

        // Drain stderr while waiting; a full pipe would stall the encoder.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            })
        });

        let waited = wait_with_timeout(&mut child, self.timeout);
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .map(|buf| stderr_tail(&buf))
            .unwrap_or_default();

        match waited {
            Ok(Some(status)) if status.success() => {
                let written = std::fs::metadata(output_path)
                    .map(|m| m.len() > 0)
                    .unwrap_or(false);
                if written {
                    CommandOutcome {
                        status: CommandStatus::Success,
                        exit_code: status.code(),
                        output_path: output_path.to_path_buf(),
                        detail: stderr,
                    }
                } else {
                    CommandOutcome {
                        status: CommandStatus::MissingOutput,
                        exit_code: status.code(),
                        output_path: output_path.to_path_buf(),
                        detail: stderr,
                    }
                }
            }
            Ok(Some(status)) => CommandOutcome {
                status: CommandStatus::Failed,
                exit_code: status.code(),
                output_path: output_path.to_path_buf(),
                detail: stderr,
            },
            Ok(None) => CommandOutcome::new(
                CommandStatus::TimedOut,
                output_path,
                format!("encoder exceeded {:?} and was killed", self.timeout),
            ),
            Err(e) => CommandOutcome::new(CommandStatus::Failed, output_path, e.to_string()),
        }
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn encode(
        &self,
        frames: &[&Frame],
        fps: f64,
        raw_path: &Path,
        output_path: &Path,
    ) -> CommandOutcome {
        let Some(first) = frames.first() else {
            return CommandOutcome::new(CommandStatus::RawWriteFailed, output_path, "no frames");
        };
        let (width, height) = (first.width(), first.height());

        let outcome = match write_raw_video(frames, raw_path) {
            Ok(written) => {
                log::debug!(
                    "raw clip {}: {} frames {}x{}",
                    raw_path.display(),
                    written,
                    width,
                    height
                );
                let args = self.args(width, height, fps, raw_path, output_path);
                self.run(&args, output_path)
            }
            Err(e) => CommandOutcome::new(
                CommandStatus::RawWriteFailed,
                output_path,
                format!("{:#}", e),
            ),
        };

        if let Err(e) = std::fs::remove_file(raw_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove raw clip {}: {}", raw_path.display(), e);
            }
        }
        if !outcome.is_success() {
            // No partial clips on disk.
            let _ = std::fs::remove_file(output_path);
        }
        outcome
    }
}

/// Write frames back-to-back as packed RGB24. Frames whose dimensions differ
/// from the first frame are skipped. Returns the number of frames written.
pub fn write_raw_video(frames: &[&Frame], path: &Path) -> Result<usize> {
    let first = frames
        .first()
        .ok_or_else(|| anyhow!("cannot write an empty raw video"))?;
    let (width, height) = (first.width(), first.height());

    let file = File::create(path)
        .with_context(|| format!("failed to create raw clip {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut written = 0usize;
    let mut skipped = 0usize;
    for frame in frames {
        if frame.width() != width || frame.height() != height || !frame.is_well_formed() {
            skipped += 1;
            continue;
        }
        out.write_all(frame.pixels())
            .with_context(|| format!("failed to write raw clip {}", path.display()))?;
        written += 1;
    }
    out.flush()
        .with_context(|| format!("failed to flush raw clip {}", path.display()))?;

    if skipped > 0 {
        log::warn!(
            "raw clip {}: skipped {} frame(s) not matching {}x{}",
            path.display(),
            skipped,
            width,
            height
        );
    }
    if written == 0 {
        return Err(anyhow!("no well-formed frames to encode"));
    }
    Ok(written)
}

/// Wait for `child` up to `timeout`. `Ok(None)` means it was killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn stderr_tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}
