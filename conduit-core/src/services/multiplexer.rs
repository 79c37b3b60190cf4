// conduit-core/src/services/multiplexer.rs
//! Tail multiplexer: `tail -f` over one or two growing files, merged into a
//! single bounded channel, plus a lazily started child process whose stdin
//! takes writes.
//!
//! The child's stdout and stderr are appended to the tailed files, so a write
//! and the output it provokes travel the same path as any other line.
//!
//! On unix the child leads its own process group, and disposal kills the whole
//! group. Bytes that are not UTF-8 are decoded lossily.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MultiplexerDefaults;
use crate::utils::path::ensure_parent;

#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error("another reader is already tailing this multiplexer")]
    ReaderBusy,

    #[error("child process exited during write (exit code {code:?})")]
    ProcessExited { code: Option<i32> },

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("multiplexer io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("multiplexer task failed: {0}")]
    Task(String),

    #[error("multiplexer reader slot poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub output: PathBuf,
    pub errors: Option<PathBuf>,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub channel_capacity: usize,
    pub poll_interval: Duration,
}

impl MultiplexerConfig {
    pub fn new(output: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self::with_defaults(output, command, &MultiplexerDefaults::default())
    }

    pub fn with_defaults(output: impl Into<PathBuf>, command: impl Into<String>, defaults: &MultiplexerDefaults) -> Self {
        Self {
            output: output.into(),
            errors: None,
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            channel_capacity: defaults.channel_capacity.max(1),
            poll_interval: defaults.poll_interval(),
        }
    }

    pub fn errors(mut self, path: impl Into<PathBuf>) -> Self {
        self.errors = Some(path.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    /// Line text without the trailing newline.
    pub text: String,
    pub is_error: bool,
}

type Slot = Arc<Mutex<Option<mpsc::Receiver<TailLine>>>>;

/// Exclusive handle on the merged line channel. Dropping it frees the slot
/// for the next `tail` call.
pub struct TailReader {
    rx: Option<mpsc::Receiver<TailLine>>,
    slot: Slot,
}

impl TailReader {
    /// Next line, or `None` once every producer has stopped.
    pub async fn next(&mut self) -> Option<TailLine> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for TailReader {
    fn drop(&mut self) {
        if let (Some(rx), Ok(mut slot)) = (self.rx.take(), self.slot.lock()) {
            *slot = Some(rx);
        }
    }
}

struct Running {
    child: Child,
    stdin: ChildStdin,
}

pub struct TailMultiplexer {
    cfg: MultiplexerConfig,
    cancel: CancellationToken,
    slot: Slot,
    readers: Vec<JoinHandle<Result<(), MultiplexError>>>,
    process: tokio::sync::Mutex<Option<Running>>,
}

impl TailMultiplexer {
    /// Start the read side. Must be called inside a tokio runtime.
    pub fn start(cfg: MultiplexerConfig) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(cfg.channel_capacity.max(1));

        let mut readers = vec![tokio::spawn(follow(
            cfg.output.clone(),
            false,
            tx.clone(),
            cfg.poll_interval,
            cancel.clone(),
        ))];
        if let Some(errors) = &cfg.errors {
            readers.push(tokio::spawn(follow(
                errors.clone(),
                true,
                tx.clone(),
                cfg.poll_interval,
                cancel.clone(),
            )));
        }
        drop(tx);

        tracing::debug!(output = %cfg.output.display(), command = %cfg.command, "tail multiplexer started");
        Self {
            cfg,
            cancel,
            slot: Arc::new(Mutex::new(Some(rx))),
            readers,
            process: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.cfg
    }

    /// Take the single reader slot. A second concurrent call is rejected.
    pub fn tail(&self) -> Result<TailReader, MultiplexError> {
        let mut slot = self.slot.lock().map_err(|_| MultiplexError::Poisoned)?;
        let rx = slot.take().ok_or(MultiplexError::ReaderBusy)?;
        Ok(TailReader {
            rx: Some(rx),
            slot: Arc::clone(&self.slot),
        })
    }

    pub async fn is_running(&self) -> bool {
        self.process.lock().await.is_some()
    }

    /// Write one line to the child's stdin, starting the child on first use.
    pub async fn append_line(&self, text: &str) -> Result<(), MultiplexError> {
        let mut guard = self.process.lock().await;
        let running = match guard.take() {
            Some(running) => running,
            None => self.spawn().await?,
        };
        let running = guard.insert(running);

        if let Some(status) = running.child.try_wait()? {
            *guard = None;
            tracing::warn!(command = %self.cfg.command, %status, "child process had exited before write");
            return Err(MultiplexError::ProcessExited { code: status.code() });
        }

        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let written = match running.stdin.write_all(line.as_bytes()).await {
            Ok(()) => running.stdin.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                let status = running.child.wait().await?;
                *guard = None;
                tracing::warn!(command = %self.cfg.command, %status, "child process exited during write");
                Err(MultiplexError::ProcessExited { code: status.code() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel both sides, kill the child's process tree, wait for the readers,
    /// then drop the channel. Returns the first reader failure, if any.
    pub async fn dispose(mut self) -> Result<(), MultiplexError> {
        self.cancel.cancel();

        if let Some(Running { mut child, stdin }) = self.process.lock().await.take() {
            drop(stdin);
            kill_tree(&mut child).await?;
            tracing::debug!(command = %self.cfg.command, "child process tree killed");
        }

        let mut first_err = None;
        for handle in std::mem::take(&mut self.readers) {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(MultiplexError::Task(e.to_string())),
            };
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "tail reader failed");
                first_err.get_or_insert(e);
            }
        }

        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
        tracing::debug!(output = %self.cfg.output.display(), "tail multiplexer disposed");
        first_err.map_or(Ok(()), Err)
    }

    async fn spawn(&self) -> Result<Running, MultiplexError> {
        let mut cmd = Command::new(&self.cfg.command);
        cmd.args(&self.cfg.args);
        if let Some(cwd) = &self.cfg.cwd {
            cmd.current_dir(cwd);
        }
        // fallback for a multiplexer dropped without dispose
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.stdin(Stdio::piped())
            .stdout(append_target(&self.cfg.output).await?)
            .stderr(match &self.cfg.errors {
                Some(path) => append_target(path).await?,
                None => Stdio::null(),
            });

        let mut child = cmd.spawn().map_err(|source| MultiplexError::Spawn {
            command: self.cfg.command.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or_else(|| MultiplexError::Spawn {
            command: self.cfg.command.clone(),
            source: std::io::Error::other("child stdin was not captured"),
        })?;

        tracing::info!(command = %self.cfg.command, pid = child.id(), "child process started");
        Ok(Running { child, stdin })
    }
}

impl Drop for TailMultiplexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// SIGKILL the child's process group, then reap the child itself.
async fn kill_tree(child: &mut Child) -> Result<(), MultiplexError> {
    signal_group(child)?;
    if child.try_wait()?.is_none() {
        child.kill().await?;
    }
    Ok(())
}

#[cfg(unix)]
fn signal_group(child: &Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        // group already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child) -> std::io::Result<()> {
    Ok(())
}

async fn append_target(path: &Path) -> Result<Stdio, MultiplexError> {
    ensure_parent(path).await?;
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(Stdio::from(file.into_std().await))
}

async fn follow(
    path: PathBuf,
    is_error: bool,
    tx: mpsc::Sender<TailLine>,
    poll: Duration,
    cancel: CancellationToken,
) -> Result<(), MultiplexError> {
    let file = loop {
        match File::open(&path).await {
            Ok(file) => break file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(poll) => {}
        }
    };
    tracing::debug!(path = %path.display(), is_error, "tailing file");

    let mut reader = BufReader::new(file);
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 || buf.last() != Some(&b'\n') {
            // at EOF, possibly holding a partial line
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(poll) => continue,
            }
        }

        let text = String::from_utf8_lossy(&buf).trim_end_matches(['\n', '\r']).to_string();
        buf.clear();
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = tx.send(TailLine { text, is_error }) => {
                // receiver gone for good
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
