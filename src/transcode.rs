//! Audio normalization via an external transcoding process.
//!
//! The decoder only understands one canonical format: 16 kHz, mono, 16-bit
//! signed little-endian PCM. Everything else (containers, codecs, sample
//! rates) is delegated to `ffmpeg`, invoked synchronously per request with
//! deterministic arguments. The process's exit status is the sole success
//! signal; its stderr is captured and carried on failure.
//!
//! Two guards the legacy behavior lacked are on by default here:
//! - an injectable timeout, so a wedged transcoder can't pin a session forever
//! - a bounded concurrency gate, so a burst of requests can't fan out into an
//!   unbounded number of transcoder processes

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Canonical sample rate the decoder expects (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Canonical channel count (mono).
pub const TARGET_CHANNELS: u16 = 1;

/// Codec argument passed to the transcoder (16-bit signed LE PCM).
pub const TARGET_CODEC: &str = "pcm_s16le";

/// How much captured stderr we keep for diagnostics.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// How often we poll a running transcoder for exit while a timeout is set.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Synchronous front-end for the external transcoding process.
///
/// Cheap to clone; clones share the same concurrency gate so the process
/// fan-out bound holds across the whole pipeline.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    timeout: Option<Duration>,
    gate: Arc<ProcessGate>,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder {
    /// A transcoder invoking `ffmpeg` from `PATH`, with a 120 s timeout and
    /// at most `num_cpus::get()` concurrent processes.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout: Some(Duration::from_secs(120)),
            gate: Arc::new(ProcessGate::new(num_cpus::get().max(1))),
        }
    }

    /// Override the transcoder executable (absolute path or `PATH` lookup).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Override the per-invocation timeout. `None` disables the timeout and
    /// restores the legacy wait-forever behavior.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override how many transcoder processes may run at once.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.gate = Arc::new(ProcessGate::new(limit.max(1)));
        self
    }

    /// Convert `input` into canonical PCM at `output`, blocking until the
    /// external process exits.
    ///
    /// A non-zero exit (or a timeout kill) surfaces as [`Error::Transcode`]
    /// carrying the process's stderr tail; the caller must not feed the
    /// output to a decoder in that case.
    pub fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let _slot = self.gate.acquire();

        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-ar")
            .arg(TARGET_SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(TARGET_CHANNELS.to_string())
            .arg("-c:a")
            .arg(TARGET_CODEC)
            .arg(output);

        debug!(
            program = %self.program.display(),
            input = %input.display(),
            output = %output.display(),
            "spawning transcoder"
        );

        let outcome = run_command(cmd, self.timeout)?;
        match outcome {
            CommandOutcome::Exited { status, stderr } if status.success() => {
                if !stderr.is_empty() {
                    debug!(stderr = %String::from_utf8_lossy(&stderr), "transcoder diagnostics");
                }
                debug!(output = %output.display(), "transcode complete");
                Ok(())
            }
            CommandOutcome::Exited { status, stderr } => Err(Error::Transcode {
                detail: format!("transcoder exited with {status}: {}", stderr_text(&stderr)),
            }),
            CommandOutcome::TimedOut { stderr } => {
                warn!(input = %input.display(), "transcoder timed out; killed");
                Err(Error::Transcode {
                    detail: format!(
                        "transcoder timed out after {:?} and was killed: {}",
                        self.timeout.unwrap_or_default(),
                        stderr_text(&stderr)
                    ),
                })
            }
        }
    }
}

/// Result of one synchronous external-command invocation.
enum CommandOutcome {
    Exited { status: ExitStatus, stderr: Vec<u8> },
    TimedOut { stderr: Vec<u8> },
}

/// Spawn a command, wait for it (optionally bounded by `timeout`), and return
/// its exit status plus captured stderr.
///
/// stderr is drained on a separate thread so a chatty process can't deadlock
/// against a full pipe while we wait for it to exit.
fn run_command(mut cmd: Command, timeout: Option<Duration>) -> Result<CommandOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let stderr_pipe = child
        .stderr
        .take()
        .expect("stderr was configured as piped");
    let stderr_handle = thread::spawn(move || -> Vec<u8> {
        use std::io::Read;
        let mut buf = Vec::new();
        let mut pipe = stderr_pipe;
        let _ = pipe.read_to_end(&mut buf);
        tail(buf, STDERR_TAIL_BYTES)
    });

    let waited = match timeout {
        None => Some(child.wait()?),
        Some(limit) => wait_with_deadline(&mut child, limit)?,
    };

    let stderr = stderr_handle.join().unwrap_or_default();

    match waited {
        Some(status) => Ok(CommandOutcome::Exited { status, stderr }),
        None => Ok(CommandOutcome::TimedOut { stderr }),
    }
}

/// Poll a child for exit until `limit` elapses; on timeout, kill and reap it
/// and return `None`.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // Kill can only fail if the process already exited; reap either way.
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

fn tail(mut buf: Vec<u8>, keep: usize) -> Vec<u8> {
    if buf.len() > keep {
        buf.drain(..buf.len() - keep);
    }
    buf
}

fn stderr_text(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr).trim().to_owned();
    if text.is_empty() {
        "(no diagnostic output)".to_owned()
    } else {
        text
    }
}

/// Counting gate bounding how many transcoder processes run simultaneously.
#[derive(Debug)]
struct ProcessGate {
    limit: usize,
    in_use: Mutex<usize>,
    released: Condvar,
}

impl ProcessGate {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> GateSlot<'_> {
        let mut in_use = self
            .in_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *in_use >= self.limit {
            in_use = self
                .released
                .wait(in_use)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *in_use += 1;
        GateSlot { gate: self }
    }
}

struct GateSlot<'a> {
    gate: &'a ProcessGate,
}

impl Drop for GateSlot<'_> {
    fn drop(&mut self) {
        let mut in_use = self
            .gate
            .in_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *in_use -= 1;
        self.gate.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn gate_bounds_concurrent_holders() {
        let gate = Arc::new(ProcessGate::new(2));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(thread::spawn(move || {
                let _slot = gate.acquire();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().expect("gate thread panicked");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn tail_keeps_last_bytes() {
        assert_eq!(tail(b"abcdef".to_vec(), 3), b"def".to_vec());
        assert_eq!(tail(b"ab".to_vec(), 3), b"ab".to_vec());
    }

    #[cfg(unix)]
    mod unix {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        use super::super::*;

        /// Write an executable shell script standing in for the transcoder.
        fn fake_transcoder(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-transcoder.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .expect("chmod script");
            path
        }

        /// Arguments are always `-y -i IN -ar .. -ac .. -c:a .. OUT`: the
        /// input is `$3` and the output is the final argument.
        const COPY_BODY: &str = r#"in="$3"
for last; do :; done
cp "$in" "$last""#;

        #[test]
        fn successful_transcode_writes_output() -> anyhow::Result<()> {
            let dir = tempfile::tempdir()?;
            let program = fake_transcoder(dir.path(), COPY_BODY);
            let input = dir.path().join("input.ogg");
            let output = dir.path().join("output.wav");
            fs::write(&input, b"pretend audio")?;

            let transcoder = Transcoder::new().with_program(&program);
            transcoder.transcode(&input, &output)?;

            assert_eq!(fs::read(&output)?, b"pretend audio");
            Ok(())
        }

        #[test]
        fn nonzero_exit_surfaces_stderr() -> anyhow::Result<()> {
            let dir = tempfile::tempdir()?;
            let program = fake_transcoder(
                dir.path(),
                r#"echo "unknown container format" >&2
exit 1"#,
            );
            let input = dir.path().join("input.bin");
            let output = dir.path().join("output.wav");
            fs::write(&input, b"garbage")?;

            let transcoder = Transcoder::new().with_program(&program);
            let err = transcoder
                .transcode(&input, &output)
                .expect_err("transcode should fail");

            match err {
                Error::Transcode { detail } => {
                    assert!(detail.contains("unknown container format"), "{detail}");
                }
                other => panic!("expected Transcode error, got {other:?}"),
            }
            assert!(!output.exists());
            Ok(())
        }

        #[test]
        fn runaway_process_is_killed_on_timeout() -> anyhow::Result<()> {
            let dir = tempfile::tempdir()?;
            let program = fake_transcoder(dir.path(), "sleep 30");
            let input = dir.path().join("input.bin");
            let output = dir.path().join("output.wav");
            fs::write(&input, b"x")?;

            let transcoder = Transcoder::new()
                .with_program(&program)
                .with_timeout(Some(Duration::from_millis(200)));

            let started = Instant::now();
            let err = transcoder
                .transcode(&input, &output)
                .expect_err("timeout should fail the transcode");
            assert!(started.elapsed() < Duration::from_secs(10));

            match err {
                Error::Transcode { detail } => assert!(detail.contains("timed out"), "{detail}"),
                other => panic!("expected Transcode error, got {other:?}"),
            }
            Ok(())
        }
    }
}
